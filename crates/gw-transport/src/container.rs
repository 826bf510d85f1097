//! Container transport adapter (spec §4.2.b): a thin wrapper that builds a
//! `docker`/`podman run` invocation and then drives it exactly like a
//! stdio adapter over the resulting process's stdin/stdout/stderr.

use gw_core::{ContainerSpec, GatewayError, McpMessage, TransportKind};
use gw_process::{locate_container_runtime, runtime_binary_exists};
use tokio::sync::broadcast;

use crate::stdio::{ConfinementRoots, PortableRuntimeRoots, StdioAdapter, StdioAdapterConfig};
use crate::{Adapter, AdapterEvent};

/// Policy-derived defaults a container invocation falls back to when the
/// spec itself leaves a field unset (spec §4.5 rule 5).
#[derive(Debug, Clone)]
pub struct ContainerRuntimeDefaults {
    pub network: String,
    pub read_only: bool,
    pub allowed_volume_roots: Vec<String>,
    pub env_prefix_allowlist: Vec<String>,
    pub preferred_runtime: Option<String>,
}

/// Build the `docker`/`podman run ...` argv for `spec`, enforcing the
/// volume and env allow-lists. Never emits a bind mount whose host path
/// escapes the allowed roots, and strips any env var not matching the
/// allow-list prefixes (aside from the sandbox marker itself).
pub fn build_run_args(
    spec: &ContainerSpec,
    defaults: &ContainerRuntimeDefaults,
    env: &std::collections::HashMap<String, String>,
) -> Result<Vec<String>, GatewayError> {
    let mut args = vec!["run".to_string(), "-i".to_string(), "--rm".to_string()];

    let network = spec.network.clone().unwrap_or_else(|| defaults.network.clone());
    args.push("--network".to_string());
    args.push(network);

    if spec.read_only.unwrap_or(defaults.read_only) {
        args.push("--read-only".to_string());
    }

    if let Some(cpu) = &spec.cpu_limit {
        args.push("--cpus".to_string());
        args.push(cpu.clone());
    }
    if let Some(memory) = &spec.memory_limit {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    if let Some(workdir) = &spec.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }

    for volume in &spec.volumes {
        if volume.host_path.contains("..") {
            return Err(GatewayError::PolicyViolation(format!(
                "volume host path '{}' contains '..'",
                volume.host_path
            )));
        }
        let allowed = defaults
            .allowed_volume_roots
            .iter()
            .any(|root| volume.host_path.starts_with(root));
        if !allowed {
            return Err(GatewayError::PolicyViolation(format!(
                "volume host path '{}' is outside the allowed volume roots",
                volume.host_path
            )));
        }
        let mode = if volume.read_only { "ro" } else { "rw" };
        args.push("-v".to_string());
        args.push(format!("{}:{}:{}", volume.host_path, volume.container_path, mode));
    }

    for (key, value) in env {
        // The sandbox marker itself is consumed by the entrypoint setup,
        // not forwarded as a regular env var.
        if key == "SANDBOX" {
            continue;
        }
        let allowed = defaults.env_prefix_allowlist.iter().any(|prefix| key.starts_with(prefix));
        if allowed {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
    }

    args.push(spec.image.clone());
    Ok(args)
}

pub struct ContainerAdapterConfig {
    pub spec: ContainerSpec,
    pub defaults: ContainerRuntimeDefaults,
    pub env: std::collections::HashMap<String, String>,
    pub confinement: ConfinementRoots,
    pub runtime_roots: PortableRuntimeRoots,
}

/// Wraps a `StdioAdapter` configured to invoke the container runtime
/// directly; falls back from `docker` to `podman` if the preferred runtime
/// binary cannot be located (spec §4.2.b) and again if an unpinned `docker`
/// run itself fails to come up (spec §4.2.b "retries once with podman").
pub struct ContainerAdapter {
    inner: StdioAdapter,
    /// Set only when no runtime was explicitly pinned, so a failed `docker`
    /// run may still be retried once against `podman`. Consumed on the
    /// first retry.
    podman_fallback: Option<ContainerAdapterConfig>,
}

impl ContainerAdapter {
    pub fn new(config: ContainerAdapterConfig) -> Result<Self, GatewayError> {
        let explicit_runtime = config.defaults.preferred_runtime.is_some();
        let runtime = locate_container_runtime(config.defaults.preferred_runtime.as_deref())
            .ok_or_else(|| {
                GatewayError::ConnectionFailed(
                    "no container runtime (docker or podman) found on PATH".to_string(),
                )
            })?;

        let podman_fallback = should_retry_with_podman(explicit_runtime, &runtime, runtime_binary_exists("podman"))
            .then(|| ContainerAdapterConfig {
                spec: config.spec.clone(),
                defaults: ContainerRuntimeDefaults {
                    preferred_runtime: Some("podman".to_string()),
                    ..config.defaults.clone()
                },
                env: config.env.clone(),
                confinement: config.confinement.clone(),
                runtime_roots: config.runtime_roots.clone(),
            });

        let inner = build_inner(&config, runtime)?;

        Ok(Self { inner, podman_fallback })
    }
}

/// Whether a failed `docker` connect attempt should retry once with
/// `podman` (spec §4.2.b): only when the caller never pinned a runtime
/// explicitly, the runtime actually in use is `docker`, and `podman` is
/// itself available to retry against.
fn should_retry_with_podman(explicit_runtime: bool, runtime: &str, podman_available: bool) -> bool {
    !explicit_runtime && runtime == "docker" && podman_available
}

fn build_inner(config: &ContainerAdapterConfig, runtime: String) -> Result<StdioAdapter, GatewayError> {
    let args = build_run_args(&config.spec, &config.defaults, &config.env)?;
    Ok(StdioAdapter::new(StdioAdapterConfig {
        command: runtime,
        args,
        env: config.env.clone(),
        working_dir: None,
        confinement: config.confinement.clone(),
        runtime_roots: config.runtime_roots.clone(),
        sandbox_packages_root: None,
        enforce_offline_install: false,
    }))
}

#[async_trait::async_trait]
impl Adapter for ContainerAdapter {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        let first = self.inner.connect().await;
        if first.is_ok() {
            return first;
        }
        let Some(fallback) = self.podman_fallback.take() else {
            return first;
        };
        self.inner = build_inner(&fallback, "podman".to_string())?;
        self.inner.connect().await
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        self.inner.disconnect().await
    }

    async fn send(&mut self, message: &McpMessage) -> Result<(), GatewayError> {
        self.inner.send(message).await
    }

    async fn receive(&mut self) -> Result<McpMessage, GatewayError> {
        self.inner.receive().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Container
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.inner.events()
    }

    fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }
}

impl Default for ContainerRuntimeDefaults {
    fn default() -> Self {
        Self {
            network: "none".to_string(),
            read_only: true,
            allowed_volume_roots: Vec::new(),
            env_prefix_allowlist: Vec::new(),
            preferred_runtime: None,
        }
    }
}
