//! Protocol stack (spec §4.4): JSON-RPC framing on top of any transport,
//! version negotiation, the `initialize`/`initialized` handshake,
//! request-response correlation, and capability query.

pub mod correlation;
pub mod handshake;

use std::sync::Arc;
use std::time::Duration;

use gw_core::{AdapterEvent, GatewayError, McpMessage};
use gw_transport::Adapter;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub use correlation::CorrelationMap;
pub use handshake::{is_method_not_found, negotiate_version};

/// Default per-request deadline absent a service-level override (spec
/// §4.4: "30 s default, overridable by service config").
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one service's protocol session: owns the correlation map, the
/// notification inbox, and the background task that demultiplexes adapter
/// events into either.
pub struct Protocol {
    adapter: Arc<Mutex<Box<dyn Adapter>>>,
    correlation: CorrelationMap,
    inbox: Arc<Mutex<mpsc::UnboundedReceiver<McpMessage>>>,
    capabilities: Arc<Mutex<Option<serde_json::Value>>>,
    default_timeout: Duration,
    demux_task: JoinHandle<()>,
}

impl Protocol {
    pub fn new(adapter: Box<dyn Adapter>, default_timeout: Duration) -> Self {
        let adapter = Arc::new(Mutex::new(adapter));
        let correlation = CorrelationMap::new();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let mut events = {
            // Safe: adapter is not yet shared beyond this constructor when
            // we grab the initial subscription.
            let guard = adapter.try_lock().expect("adapter uncontended at construction");
            guard.events()
        };
        let correlation_for_task = correlation.clone();
        let demux_task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AdapterEvent::Message(message)) => {
                        if message.is_response() {
                            if correlation_for_task.resolve(message.clone()).await {
                                continue;
                            }
                            // No pending entry (e.g. already timed out) — drop.
                        } else {
                            let _ = inbox_tx.send(message);
                        }
                    }
                    Ok(AdapterEvent::Disconnect) => {
                        correlation_for_task.reject_all_disconnected().await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            adapter,
            correlation,
            inbox: Arc::new(Mutex::new(inbox_rx)),
            capabilities: Arc::new(Mutex::new(None)),
            default_timeout,
            demux_task,
        }
    }

    /// Send a request with a fresh ulid id, awaiting its matched response
    /// or rejection (timeout/cancel/disconnect).
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout_override: Option<Duration>,
    ) -> Result<McpMessage, GatewayError> {
        let id = serde_json::Value::String(ulid::Ulid::new().to_string());
        let message = McpMessage::request(id.clone(), method, params);
        let deadline = timeout_override.unwrap_or(self.default_timeout);
        let rx = self.correlation.register(id, deadline).await;

        self.adapter.lock().await.send(&message).await?;

        rx.await.map_err(|_| GatewayError::Cancelled)?
    }

    pub async fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), GatewayError> {
        let message = McpMessage::notification(method, params);
        self.adapter.lock().await.send(&message).await
    }

    /// Resolves with the next queued non-response message (request or
    /// notification), spec §4.4 `receiveMessage`.
    pub async fn receive_message(&self, deadline: Duration) -> Result<McpMessage, GatewayError> {
        let mut inbox = self.inbox.lock().await;
        tokio::time::timeout(deadline, inbox.recv())
            .await
            .map_err(|_| GatewayError::RequestTimeout(deadline))?
            .ok_or(GatewayError::ConnectionClosed)
    }

    pub async fn cancel(&self, id: &serde_json::Value) -> bool {
        self.correlation.cancel(id).await
    }

    pub async fn capabilities(&self) -> Option<serde_json::Value> {
        self.capabilities.lock().await.clone()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.adapter.lock().await.pid()
    }

    pub async fn disconnect(&self) -> Result<(), GatewayError> {
        self.correlation.reject_all_disconnected().await;
        self.adapter.lock().await.disconnect().await
    }

    /// `initialize` → two `initialized` notifications → `tools/list` probe
    /// (spec §4.4 Handshake). `client_versions` is ordered latest-first.
    pub async fn handshake(
        &self,
        client_versions: &[&str],
        client_capabilities: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        self.adapter.lock().await.connect().await?;

        let response = self
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": client_versions.first().copied().unwrap_or_default(),
                    "capabilities": client_capabilities,
                }),
                None,
            )
            .await?;

        if let Some(error) = &response.error {
            return Err(handshake::handshake_failed(format!(
                "initialize rejected by peer: {error}"
            )));
        }
        let Some(result) = response.result else {
            return Err(handshake::handshake_failed("initialize returned no result"));
        };

        let server_versions: Vec<String> = result
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .map(|v| vec![v.to_string()])
            .unwrap_or_default();
        if negotiate_version(client_versions, &server_versions).is_none() && !server_versions.is_empty()
        {
            return Err(GatewayError::VersionUnsupported(server_versions.join(", ")));
        }

        // Two `initialized`-shaped notifications for compatibility with
        // varied peers: one bare, one namespaced (spec §4.4).
        self.notify("initialized", serde_json::json!({})).await?;
        self.notify("notifications/initialized", serde_json::json!({}))
            .await?;

        // Single `tools/list` probe: `MethodNotFound` is explicitly
        // tolerated, any other response error fails the handshake.
        let probe = self.request("tools/list", serde_json::json!({}), None).await?;
        if let Some(error) = &probe.error {
            if !is_method_not_found(error) {
                return Err(handshake::handshake_failed(format!(
                    "tools/list probe failed: {error}"
                )));
            }
        }

        *self.capabilities.lock().await = result.get("capabilities").cloned();
        Ok(result)
    }
}

impl Drop for Protocol {
    fn drop(&mut self) {
        self.demux_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gw_core::TransportKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast;

    /// A stub adapter that echoes an `initialize` result and tolerates the
    /// `tools/list` probe with a `MethodNotFound` error.
    struct StubAdapter {
        events_tx: broadcast::Sender<AdapterEvent>,
        connected: AtomicBool,
    }

    impl StubAdapter {
        fn new() -> Self {
            let (events_tx, _) = broadcast::channel(64);
            Self {
                events_tx,
                connected: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        async fn connect(&mut self) -> Result<(), GatewayError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), GatewayError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&mut self, message: &McpMessage) -> Result<(), GatewayError> {
            let Some(method) = &message.method else { return Ok(()) };
            let Some(id) = message.id.clone() else { return Ok(()) };

            let response = match method.as_str() {
                "initialize" => McpMessage {
                    jsonrpc: "2.0".to_string(),
                    id: Some(id),
                    method: None,
                    params: None,
                    result: Some(serde_json::json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": {"tools": {}}
                    })),
                    error: None,
                },
                "tools/list" => McpMessage {
                    jsonrpc: "2.0".to_string(),
                    id: Some(id),
                    method: None,
                    params: None,
                    result: None,
                    error: Some(serde_json::json!({"code": -32601, "message": "no method"})),
                },
                _ => return Ok(()),
            };
            let _ = self.events_tx.send(AdapterEvent::Message(response));
            Ok(())
        }

        async fn receive(&mut self) -> Result<McpMessage, GatewayError> {
            Err(GatewayError::NotConnected)
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn transport(&self) -> TransportKind {
            TransportKind::Stdio
        }

        fn events(&self) -> broadcast::Receiver<AdapterEvent> {
            self.events_tx.subscribe()
        }
    }

    #[tokio::test]
    async fn test_handshake_tolerates_method_not_found_on_probe() {
        let protocol = Protocol::new(Box::new(StubAdapter::new()), Duration::from_secs(5));
        let result = protocol
            .handshake(&["2025-06-18", "2025-03-26"], serde_json::json!({}))
            .await;
        assert!(result.is_ok());
        assert!(protocol.capabilities().await.is_some());
    }

    #[tokio::test]
    async fn test_request_times_out_when_unanswered() {
        struct SilentAdapter {
            events_tx: broadcast::Sender<AdapterEvent>,
        }
        #[async_trait]
        impl Adapter for SilentAdapter {
            async fn connect(&mut self) -> Result<(), GatewayError> {
                Ok(())
            }
            async fn disconnect(&mut self) -> Result<(), GatewayError> {
                Ok(())
            }
            async fn send(&mut self, _message: &McpMessage) -> Result<(), GatewayError> {
                Ok(())
            }
            async fn receive(&mut self) -> Result<McpMessage, GatewayError> {
                Err(GatewayError::NotConnected)
            }
            fn is_connected(&self) -> bool {
                true
            }
            fn transport(&self) -> TransportKind {
                TransportKind::Stdio
            }
            fn events(&self) -> broadcast::Receiver<AdapterEvent> {
                self.events_tx.subscribe()
            }
        }
        let (events_tx, _) = broadcast::channel(8);
        let protocol = Protocol::new(Box::new(SilentAdapter { events_tx }), Duration::from_millis(50));
        let result = protocol.request("tools/list", serde_json::json!({}), None).await;
        assert!(matches!(result, Err(GatewayError::RequestTimeout(_))));
    }
}
