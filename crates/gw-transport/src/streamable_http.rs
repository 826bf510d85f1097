//! Streamable-HTTP transport adapter (spec §4.2.d): a POST that opens an
//! SSE response stream, decoded into delta / done / error events.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gw_core::{GatewayError, McpMessage, TransportKind};
use tokio::sync::{broadcast, mpsc};

use crate::http::HttpAdapterConfig;
use crate::ssrf::{parse_host_port, preflight_ssrf_check, validate_http_url};
use crate::{Adapter, AdapterEvent};

/// One decoded Server-Sent Event payload.
#[derive(Debug, Clone)]
pub enum SseEvent {
    Delta(McpMessage),
    Done,
    Error(String),
}

/// Decode a single SSE `data:` payload line into an [`SseEvent`]. The
/// stream's framing (splitting on blank lines) is handled by the caller;
/// this only interprets one event's accumulated `data:` body.
pub fn decode_sse_payload(data: &str) -> SseEvent {
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => {
            if let Some(err) = value.get("error") {
                return SseEvent::Error(err.to_string());
            }
            match serde_json::from_value::<McpMessage>(value) {
                Ok(message) => SseEvent::Delta(message),
                Err(e) => SseEvent::Error(e.to_string()),
            }
        }
        Err(e) => SseEvent::Error(format!("invalid SSE JSON payload: {e}")),
    }
}

/// Accumulate raw SSE bytes into complete event bodies (split on a blank
/// line), stripping the `data:` field prefix and joining multi-line data.
pub struct SseLineAccumulator {
    buf: String,
}

impl SseLineAccumulator {
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();

        while let Some(idx) = self.buf.find("\n\n") {
            let raw_event = self.buf[..idx].to_string();
            self.buf.drain(..idx + 2);

            let data: String = raw_event
                .lines()
                .filter_map(|line| line.strip_prefix("data:").or_else(|| line.strip_prefix("data: ")))
                .collect::<Vec<_>>()
                .join("\n");

            if !data.is_empty() {
                events.push(decode_sse_payload(&data));
            }
        }

        events
    }
}

impl Default for SseLineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StreamableHttpAdapter {
    config: HttpAdapterConfig,
    client: reqwest::Client,
    connected: bool,
    events_tx: broadcast::Sender<AdapterEvent>,
    inbound_rx: Option<mpsc::UnboundedReceiver<McpMessage>>,
    pending_send: Option<mpsc::UnboundedSender<McpMessage>>,
}

impl StreamableHttpAdapter {
    pub fn new(config: HttpAdapterConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            config,
            client: reqwest::Client::new(),
            connected: false,
            events_tx,
            inbound_rx: None,
            pending_send: None,
        }
    }
}

#[async_trait]
impl Adapter for StreamableHttpAdapter {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        let url = validate_http_url(&self.config.base_url, self.config.allow_insecure)?;
        let (host, port) = parse_host_port(&url)?;
        preflight_ssrf_check(&host, port, self.config.allow_insecure).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inbound_rx = Some(rx);
        self.pending_send = Some(tx);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        self.connected = false;
        self.inbound_rx = None;
        self.pending_send = None;
        let _ = self.events_tx.send(AdapterEvent::Disconnect);
        Ok(())
    }

    async fn send(&mut self, message: &McpMessage) -> Result<(), GatewayError> {
        if !self.connected {
            return Err(GatewayError::NotConnected);
        }
        let Some(tx) = self.pending_send.clone() else {
            return Err(GatewayError::NotConnected);
        };

        let mut request = self
            .client
            .post(&self.config.base_url)
            .header("Accept", "text/event-stream")
            .json(message);
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let timeout = self.config.request_timeout.unwrap_or(Duration::from_secs(30));
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| GatewayError::RequestTimeout(timeout))?
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::ConnectionFailed(format!("HTTP {}", response.status())));
        }

        let events_tx = self.events_tx.clone();
        let mut byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            let mut acc = SseLineAccumulator::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(chunk) = chunk else {
                    let _ = events_tx.send(AdapterEvent::Error("SSE stream read failed".to_string()));
                    break;
                };
                let text = String::from_utf8_lossy(&chunk);
                for event in acc.push(&text) {
                    match event {
                        SseEvent::Delta(message) => {
                            let _ = tx.send(message.clone());
                            let _ = events_tx.send(AdapterEvent::Message(message));
                        }
                        SseEvent::Done => {
                            return;
                        }
                        SseEvent::Error(message) => {
                            let _ = events_tx.send(AdapterEvent::Error(message));
                        }
                    }
                }
            }
        });

        let _ = self.events_tx.send(AdapterEvent::Sent(message.clone()));
        Ok(())
    }

    async fn receive(&mut self) -> Result<McpMessage, GatewayError> {
        let Some(rx) = self.inbound_rx.as_mut() else {
            return Err(GatewayError::NotConnected);
        };
        rx.recv().await.ok_or(GatewayError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn transport(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sse_payload_delta() {
        let event = decode_sse_payload(r#"{"jsonrpc":"2.0","id":1,"result":{"text":"hi"}}"#);
        assert!(matches!(event, SseEvent::Delta(_)));
    }

    #[test]
    fn test_decode_sse_payload_done_marker() {
        assert!(matches!(decode_sse_payload("[DONE]"), SseEvent::Done));
    }

    #[test]
    fn test_decode_sse_payload_error_field() {
        let event = decode_sse_payload(r#"{"error":{"code":-32000,"message":"boom"}}"#);
        assert!(matches!(event, SseEvent::Error(_)));
    }

    #[test]
    fn test_accumulator_splits_on_blank_line() {
        let mut acc = SseLineAccumulator::new();
        let events = acc.push("data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":0}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SseEvent::Delta(_)));
        assert!(matches!(events[1], SseEvent::Done));
    }

    #[test]
    fn test_accumulator_buffers_partial_event() {
        let mut acc = SseLineAccumulator::new();
        let events = acc.push("data: {\"jsonrpc\":\"2.0\"");
        assert!(events.is_empty());
        let events = acc.push(",\"id\":1,\"result\":0}\n\n");
        assert_eq!(events.len(), 1);
    }
}
