use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport kind a `ServiceTemplate` is configured for (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    Http,
    StreamableHttp,
    Container,
}

/// Declared trust level of a template, consumed by the sandbox policy
/// engine (§4.5 rule 2/3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Trusted,
    #[default]
    Untrusted,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityOverrides {
    #[serde(default)]
    pub require_container: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    #[serde(default)]
    pub request_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub read_only: Option<bool>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// `ServiceTemplate` — spec §3 row 1.
///
/// Invariant: `transport == Container` implies `container.is_some()`.
/// Re-registration via the registry replaces the template atomically; a
/// template is never mutated in place while a derived instance is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub name: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub security: SecurityOverrides,
    #[serde(default)]
    pub timeouts: TimeoutOverrides,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ServiceTemplate {
    /// Validates the transport/container invariant from spec §3.
    pub fn validate(&self) -> Result<(), String> {
        if self.transport == TransportKind::Container && self.container.is_none() {
            return Err(format!(
                "template '{}' declares transport=container but no container spec",
                self.name
            ));
        }
        Ok(())
    }
}

/// Per-instance state machine (spec §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Idle,
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Crashed,
    Restarting,
    Maintenance,
}

impl InstanceState {
    /// The explicit adjacency list from spec §3. Any transition not listed
    /// here is a programming error: logged but still applied (self-healing,
    /// spec §4.3 "State history").
    pub fn allowed_next(self) -> &'static [InstanceState] {
        use InstanceState::*;
        match self {
            Idle => &[Initializing],
            Initializing => &[Starting, Error],
            Starting => &[Running, Error],
            Running => &[Stopping, Error, Crashed, Restarting, Maintenance],
            Stopping => &[Stopped, Error, Crashed],
            Restarting => &[Starting, Error],
            Maintenance => &[Running, Stopping],
            Stopped => &[],
            Error => &[],
            Crashed => &[],
        }
    }

    pub fn is_allowed(self, next: InstanceState) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Terminal for the instance's lifetime (spec §3).
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Crashed)
    }
}

/// One recorded state transition, kept in the supervisor's bounded history
/// (spec §4.3: last 10 per instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: InstanceState,
    pub to: InstanceState,
    pub at: DateTime<Utc>,
    pub was_allowed: bool,
}

/// `ServiceInstance` — spec §3 row 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub template_ref: String,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub capability_cache: Option<serde_json::Value>,
}

impl ServiceInstance {
    /// Fresh instance id: template name + ULID suffix (unique, sortable by
    /// creation time per spec §3's "suffixed by creation timestamp").
    pub fn fresh_id(template_name: &str) -> String {
        format!("{template_name}-{}", ulid::Ulid::new())
    }

    pub fn new(template_ref: impl Into<String>) -> Self {
        let template_ref = template_ref.into();
        Self {
            id: Self::fresh_id(&template_ref),
            template_ref,
            state: InstanceState::Idle,
            pid: None,
            started_at: None,
            error_count: 0,
            capability_cache: None,
        }
    }
}

/// `McpMessage` — spec §3 row 3. Either a request/notification (`method`
/// set) or a response (`result`/`error` set); never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl McpMessage {
    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    pub fn request(id: serde_json::Value, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn notification(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }
}

/// Key rotation policy for a `Channel` (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    #[default]
    Polling,
    Random,
}

/// Source of a key's secret value, resolved lazily so raw secrets do not
/// sit in template config at rest (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeySource {
    Literal(String),
    EnvRef(String),
}

/// `Key` — spec §3 row. A key disabled by an `auth` error is not
/// re-enabled automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub index: usize,
    pub source: KeySource,
    pub enabled: bool,
    pub error_count: u32,
    pub total_requests: u64,
}

/// `Channel` (AI) — spec §3 row. At most one key index is considered
/// "current"; a disabled channel contributes 0 weight to selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub keys: Vec<Key>,
    pub rotation: RotationPolicy,
    pub weight: u32,
    pub enabled: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub current_key_index: usize,
}

impl Channel {
    /// Effective weight for the selector: 0 if disabled or cooling down.
    pub fn effective_weight(&self, now: DateTime<Utc>) -> u32 {
        if !self.enabled {
            return 0;
        }
        if let Some(until) = self.cooldown_until {
            if now < until {
                return 0;
            }
        }
        self.weight
    }
}

/// `UsageStats` — spec §3 row. Non-decreasing counters within a window;
/// reset at window boundaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub per_model: HashMap<String, ModelUsage>,
    pub total_cost_usd: f64,
    pub budget_usd: Option<f64>,
    pub window_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
    pub cost_usd: f64,
}
