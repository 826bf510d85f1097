//! Sandbox policy engine (spec §4.5).
//!
//! Given a template and the gateway-wide policy, returns an effective
//! template plus the reasons policy was applied. Never mutates the input.

use gw_audit::{classify_args, looks_like_secret, PackageManagerHint};
use gw_core::{ContainerSpec, ServiceTemplate, TransportKind, TrustLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyProfile {
    #[default]
    Default,
    LockedDown,
}

/// Container-adapter defaults populated by policy (spec §4.5 rule 5),
/// carried in the output so the container adapter does not need its own
/// copy of policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerPolicyDefaults {
    pub network: String,
    pub read_only: bool,
    pub allowed_volume_roots: Vec<String>,
    pub env_prefix_allowlist: Vec<String>,
    pub default_runtime: String,
}

impl Default for ContainerPolicyDefaults {
    fn default() -> Self {
        Self {
            network: "none".to_string(),
            read_only: true,
            allowed_volume_roots: Vec::new(),
            env_prefix_allowlist: Vec::new(),
            default_runtime: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPolicy {
    pub profile: PolicyProfile,
    #[serde(default)]
    pub prefer_containers_for_untrusted: bool,
    #[serde(default)]
    pub container: ContainerPolicyDefaults,
    /// Root under which portable-sandbox package installs are pinned
    /// (spec §4.5 rule 4).
    pub sandbox_packages_root: String,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            profile: PolicyProfile::Default,
            prefer_containers_for_untrusted: false,
            container: ContainerPolicyDefaults::default(),
            sandbox_packages_root: "/var/lib/mcp-gateway/sandbox/packages".to_string(),
        }
    }
}

/// Output of a policy pass: the effective template, whether policy changed
/// anything, and a human-readable trail of why.
#[derive(Debug, Clone)]
pub struct NormalizedTemplate {
    pub config: ServiceTemplate,
    pub applied: bool,
    pub reasons: Vec<String>,
    pub policy: GatewayPolicy,
}

/// Apply the gateway's sandbox policy to `template`, returning an effective
/// copy. `template` itself is never mutated.
pub fn normalize(template: &ServiceTemplate, policy: &GatewayPolicy) -> NormalizedTemplate {
    let mut config = template.clone();
    let mut reasons = Vec::new();
    let mut force_container = false;

    // Rule 1: explicit per-template requirement.
    if config.security.require_container {
        force_container = true;
        reasons.push("template sets security.requireContainer".to_string());
    }

    // Rule 2: gateway-wide preference for non-trusted templates.
    if !force_container
        && policy.prefer_containers_for_untrusted
        && config.trust_level != TrustLevel::Trusted
    {
        force_container = true;
        reasons.push("gateway prefers containers for non-trusted templates".to_string());
    }

    // Rule 3: locked-down profile quarantines any non-trusted stdio template.
    if !force_container
        && policy.profile == PolicyProfile::LockedDown
        && config.transport == TransportKind::Stdio
        && config.trust_level != TrustLevel::Trusted
    {
        force_container = true;
        reasons.push("profile locked-down quarantines untrusted stdio templates".to_string());
    }

    if force_container && config.transport != TransportKind::Container {
        if config.container.is_none() {
            config.container = Some(ContainerSpec {
                image: String::new(),
                network: None,
                read_only: None,
                volumes: Vec::new(),
                cpu_limit: None,
                memory_limit: None,
                workdir: None,
            });
        }
        config.transport = TransportKind::Container;
    }

    // Rule 4: default profile auto-sandbox hints for npm/npx-shaped stdio.
    if !force_container && policy.profile == PolicyProfile::Default {
        if let Some(command) = config.command.clone() {
            let hint = classify_args(&command, &config.args);
            if matches!(hint, PackageManagerHint::Npm | PackageManagerHint::Npx) {
                config
                    .env
                    .entry("SANDBOX".to_string())
                    .or_insert_with(|| "portable".to_string());
                config
                    .env
                    .entry("MCP_SANDBOX_NETWORK".to_string())
                    .or_insert_with(|| "local-only".to_string());
                config.working_dir = Some(policy.sandbox_packages_root.clone());
                reasons.push("default profile auto-sandboxes npm/npx invocation".to_string());
            }
        }
    }

    // Rule 5a: flag template env values that look like live credentials
    // rather than placeholders, so operators notice a secret checked into a
    // template definition instead of injected at runtime.
    let mut secret_keys: Vec<&str> = config
        .env
        .iter()
        .filter(|(_, value)| looks_like_secret(value))
        .map(|(key, _)| key.as_str())
        .collect();
    secret_keys.sort_unstable();
    for key in secret_keys {
        reasons.push(format!("env var '{key}' looks like a live secret, not a placeholder"));
    }

    // Rule 5: container defaults rendered into the spec when containerized.
    if let Some(container) = config.container.as_mut() {
        if container.network.is_none() {
            container.network = Some(policy.container.network.clone());
        }
        if container.read_only.is_none() {
            container.read_only = Some(policy.container.read_only);
        }
        reasons.push("container defaults applied (network/read-only/allow-lists)".to_string());
    }

    let applied = !reasons.is_empty();
    NormalizedTemplate {
        config,
        applied,
        reasons,
        policy: policy.clone(),
    }
}
