//! Transport adapters (spec §4.2): a uniform contract over the three
//! downstream wire protocols, plus a container-runtime wrapper.

pub mod container;
pub mod http;
pub mod ssrf;
pub mod stdio;
pub mod streamable_http;

use async_trait::async_trait;
use gw_core::{GatewayError, McpMessage, TransportKind};
use tokio::sync::broadcast;

pub use container::ContainerAdapter;
pub use gw_core::topics::AdapterEvent;
pub use http::HttpAdapter;
pub use stdio::StdioAdapter;
pub use streamable_http::StreamableHttpAdapter;

/// Shared contract every transport adapter implements (spec §4.2).
///
/// `send` is request-agnostic — correlation is performed one layer up, in
/// the protocol stack. Adapters emit events (`message`, `sent`, `stderr`,
/// `disconnect`, `error`) on a broadcast topic rather than callbacks.
#[async_trait]
pub trait Adapter: Send {
    async fn connect(&mut self) -> Result<(), GatewayError>;
    async fn disconnect(&mut self) -> Result<(), GatewayError>;
    async fn send(&mut self, message: &McpMessage) -> Result<(), GatewayError>;
    async fn receive(&mut self) -> Result<McpMessage, GatewayError>;
    fn is_connected(&self) -> bool;
    fn transport(&self) -> TransportKind;
    fn events(&self) -> broadcast::Receiver<AdapterEvent>;
    /// The underlying child's pid, when the transport has one (spec §3:
    /// "pid only meaningful in states {starting, running, stopping,
    /// restarting}"). `None` for the HTTP-family adapters.
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Fixed allow-list of executables the stdio adapter may invoke directly
/// (spec §4.2.a: "only a fixed allow-list of executables is permitted").
pub const COMMAND_ALLOWLIST: &[&str] = &[
    "node", "npm", "npx", "python", "python3", "pip", "pip3", "go", "uv", "uvx", "deno", "bun",
    "docker", "podman", "sh",
];

pub fn is_command_allowed(command: &str) -> bool {
    let basename = std::path::Path::new(command)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(command);
    COMMAND_ALLOWLIST.contains(&basename)
}

/// Env var patterns that typically indicate a missing-configuration
/// complaint (spec §4.2.a stderr hinting).
pub fn looks_like_missing_env_var(line: &str) -> bool {
    static PATTERNS: &[&str] = &[
        "is not defined",
        "is not set",
        "missing environment variable",
        "required environment variable",
        "env var",
        "ENV_VAR",
    ];
    let lower = line.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(&p.to_lowercase()))
}
