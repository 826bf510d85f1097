//! Gateway configuration (spec §6: "gateway config is externally
//! persisted... out of scope" — the core only defines sane defaults and
//! an override surface; persistence format is the operator's choice of a
//! toml file).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use gw_auth::AuthMode;
use serde::Deserialize;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 8787;
const DEFAULT_MAX_CONNECTIONS: usize = 64;
const DEFAULT_MAX_REQUESTS_PER_SEC: u32 = 100;
const DEFAULT_MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    http_bind: Option<String>,
    http_port: Option<u16>,
    max_connections: Option<usize>,
    max_requests_per_sec: Option<u32>,
    max_request_body_bytes: Option<usize>,
    request_timeout_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
    auth_mode: Option<AuthMode>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub http_bind: String,
    pub http_port: u16,
    pub max_connections: usize,
    pub max_requests_per_sec: u32,
    pub max_request_body_bytes: usize,
    pub request_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub auth_mode: AuthMode,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_bind: DEFAULT_HTTP_BIND.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_requests_per_sec: DEFAULT_MAX_REQUESTS_PER_SEC,
            max_request_body_bytes: DEFAULT_MAX_REQUEST_BODY_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            auth_mode: AuthMode::default(),
        }
    }
}

impl GatewayConfig {
    pub fn load(
        config_path: Option<&Path>,
        bind_override: Option<String>,
        port_override: Option<u16>,
        auth_mode_override: Option<AuthMode>,
    ) -> Result<Self> {
        let file = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read gateway config at {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("invalid gateway config at {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let defaults = Self::default();
        Ok(Self {
            http_bind: bind_override.or(file.http_bind).unwrap_or(defaults.http_bind),
            http_port: port_override.or(file.http_port).unwrap_or(defaults.http_port),
            max_connections: file.max_connections.unwrap_or(defaults.max_connections),
            max_requests_per_sec: file.max_requests_per_sec.unwrap_or(defaults.max_requests_per_sec),
            max_request_body_bytes: file.max_request_body_bytes.unwrap_or(defaults.max_request_body_bytes),
            request_timeout_secs: file.request_timeout_secs.unwrap_or(defaults.request_timeout_secs),
            handshake_timeout_secs: file.handshake_timeout_secs.unwrap_or(defaults.handshake_timeout_secs),
            auth_mode: auth_mode_override.or(file.auth_mode).unwrap_or(defaults.auth_mode),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_bind, self.http_port)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("gatewayd.toml")
}
