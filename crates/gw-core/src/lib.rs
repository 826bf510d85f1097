//! Shared data model and error kinds for the MCP gateway core.

pub mod error;
pub mod topics;
pub mod types;

pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use topics::{AdapterEvent, ServiceEvent, Topic};
pub use types::*;

/// MCP protocol versions this gateway advertises, descending (spec §6).
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-26"];
