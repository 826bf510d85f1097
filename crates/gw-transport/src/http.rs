//! HTTP transport adapter (spec §4.2.c): a single request/response POST per
//! outbound message, no persistent connection, no `receive`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use gw_core::{GatewayError, McpMessage, TransportKind};
use tokio::sync::broadcast;

use crate::ssrf::{parse_host_port, preflight_ssrf_check, validate_http_url};
use crate::{Adapter, AdapterEvent};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub base_url: String,
    /// Parsed from a service template's `HTTP_HEADERS` env var, a JSON
    /// object of header name to value (spec §4.2.c).
    pub headers: HashMap<String, String>,
    pub request_timeout: Option<Duration>,
    pub allow_insecure: bool,
}

/// Resolve the base URL for an HTTP-transport template from, in order: an
/// explicit `MCP_SERVER_URL` env var, an explicit `command` field treated as
/// a literal URL, an explicit `MCP_BASE_URL` env var, or a URL built from
/// `MCP_HOST`/`MCP_PORT` with the scheme chosen by `MCP_HTTPS` (spec §6 HTTP
/// adapter configuration vars).
pub fn resolve_base_url(
    env: &HashMap<String, String>,
    command: Option<&str>,
) -> Result<String, GatewayError> {
    if let Some(url) = env.get("MCP_SERVER_URL") {
        return Ok(url.clone());
    }
    if let Some(command) = command {
        if command.starts_with("http://") || command.starts_with("https://") {
            return Ok(command.to_string());
        }
    }
    if let Some(url) = env.get("MCP_BASE_URL") {
        return Ok(url.clone());
    }
    if let (Some(host), Some(port)) = (env.get("MCP_HOST"), env.get("MCP_PORT")) {
        let scheme = if is_truthy(env.get("MCP_HTTPS")) { "https" } else { "http" };
        return Ok(format!("{scheme}://{host}:{port}"));
    }
    Err(GatewayError::ConnectionFailed(
        "no MCP_SERVER_URL, URL command, MCP_BASE_URL, or MCP_HOST/MCP_PORT pair to resolve a base url"
            .to_string(),
    ))
}

fn is_truthy(value: Option<&String>) -> bool {
    matches!(value.map(|v| v.to_ascii_lowercase()).as_deref(), Some("1" | "true" | "yes" | "on"))
}

pub fn parse_http_headers(raw: &str) -> Result<HashMap<String, String>, GatewayError> {
    serde_json::from_str(raw)
        .map_err(|e| GatewayError::MalformedMessage(format!("HTTP_HEADERS is not a JSON object: {e}")))
}

pub struct HttpAdapter {
    config: HttpAdapterConfig,
    client: reqwest::Client,
    connected: bool,
    events_tx: broadcast::Sender<AdapterEvent>,
}

impl HttpAdapter {
    pub fn new(config: HttpAdapterConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            config,
            client: reqwest::Client::new(),
            connected: false,
            events_tx,
        }
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        let url = validate_http_url(&self.config.base_url, self.config.allow_insecure)?;
        let (host, port) = parse_host_port(&url)?;
        preflight_ssrf_check(&host, port, self.config.allow_insecure).await?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        self.connected = false;
        let _ = self.events_tx.send(AdapterEvent::Disconnect);
        Ok(())
    }

    async fn send(&mut self, message: &McpMessage) -> Result<(), GatewayError> {
        if !self.connected {
            return Err(GatewayError::NotConnected);
        }

        let mut request = self.client.post(&self.config.base_url).json(message);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let timeout = self.config.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| GatewayError::RequestTimeout(timeout))?
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let _ = self
                .events_tx
                .send(AdapterEvent::Error(format!("HTTP {status} from downstream service")));
            return Err(GatewayError::ConnectionFailed(format!("HTTP {status}")));
        }

        let body: McpMessage = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedMessage(e.to_string()))?;

        let _ = self.events_tx.send(AdapterEvent::Sent(message.clone()));
        let _ = self.events_tx.send(AdapterEvent::Message(body));
        Ok(())
    }

    async fn receive(&mut self) -> Result<McpMessage, GatewayError> {
        Err(GatewayError::PolicyViolation(
            "the HTTP adapter does not support out-of-band receive; responses arrive via send()"
                .to_string(),
        ))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Http
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events_tx.subscribe()
    }
}
