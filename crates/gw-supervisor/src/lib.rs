//! Process supervisor & state manager (spec §4.3): owns each
//! `ServiceInstance`'s lifetime, serializes its state transitions, and
//! publishes lifecycle events.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gw_core::{GatewayError, InstanceState, ServiceEvent, ServiceInstance, StateTransition, Topic};
use gw_protocol::Protocol;
use gw_transport::Adapter;
use tokio::sync::Mutex;

const STATE_HISTORY_CAP: usize = 10;
const STOP_GRACE: Duration = Duration::from_secs(5);

struct Entry {
    instance: ServiceInstance,
    history: VecDeque<StateTransition>,
    protocol: Option<Arc<Protocol>>,
}

impl Entry {
    fn record(&mut self, to: InstanceState) {
        let from = self.instance.state;
        let was_allowed = from.is_allowed(to);
        if !was_allowed {
            tracing::warn!(
                instance = %self.instance.id,
                from = ?from,
                to = ?to,
                "applying transition outside the declared adjacency list"
            );
        }
        self.history.push_back(StateTransition {
            from,
            to,
            at: Utc::now(),
            was_allowed,
        });
        if self.history.len() > STATE_HISTORY_CAP {
            self.history.pop_front();
        }
        self.instance.state = to;
    }
}

/// Supervises a set of `ServiceInstance`s. Callers provide a pre-built
/// transport adapter per instance (adapter construction from a
/// `ServiceTemplate` is the registry's job, not the supervisor's) so this
/// crate stays testable against stub adapters.
pub struct Supervisor {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    events: Topic<ServiceEvent>,
    handshake_timeout: Duration,
}

impl Supervisor {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            events: Topic::default(),
            handshake_timeout,
        }
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// `startProcess` (spec §4.3): `idle → initializing → starting →
    /// running`, performing the MCP handshake in between. On any failure,
    /// the instance is cleaned up and transitioned to a terminal state,
    /// and the error is re-raised.
    pub async fn start_process(
        &self,
        template_name: &str,
        client_versions: &[&str],
        client_capabilities: serde_json::Value,
        adapter: Box<dyn Adapter>,
    ) -> Result<ServiceInstance, GatewayError> {
        let instance = ServiceInstance::new(template_name);
        let id = instance.id.clone();
        let mut entry = Entry {
            instance,
            history: VecDeque::new(),
            protocol: None,
        };
        entry.record(InstanceState::Initializing);

        let protocol = Arc::new(Protocol::new(adapter, self.handshake_timeout));
        entry.record(InstanceState::Starting);
        entry.protocol = Some(protocol.clone());
        self.entries.lock().await.insert(id.clone(), entry);

        match protocol.handshake(client_versions, client_capabilities).await {
            Ok(capabilities) => {
                let mut entries = self.entries.lock().await;
                let entry = entries.get_mut(&id).expect("inserted above");
                entry.record(InstanceState::Running);
                entry.instance.pid = protocol.pid().await;
                entry.instance.started_at = Some(Utc::now());
                entry.instance.capability_cache = Some(capabilities);
                let result = entry.instance.clone();
                drop(entries);
                self.events.publish(ServiceEvent::Started { instance_id: id });
                Ok(result)
            }
            Err(error) => {
                let _ = protocol.disconnect().await;
                let mut entries = self.entries.lock().await;
                let entry = entries.get_mut(&id).expect("inserted above");
                entry.instance.error_count += 1;
                entry.record(InstanceState::Error);
                drop(entries);
                self.events.publish(ServiceEvent::Error {
                    instance_id: id,
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// `stopProcess` (spec §4.3): graceful terminate, 5s grace, force-kill,
    /// cleanup, `→ stopped`.
    pub async fn stop_process(&self, id: &str) -> Result<(), GatewayError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            return Err(GatewayError::InstanceNotFound(id.to_string()));
        };
        entry.record(InstanceState::Stopping);
        let protocol = entry.protocol.clone();
        drop(entries);

        if let Some(protocol) = protocol {
            let _ = tokio::time::timeout(STOP_GRACE, protocol.disconnect()).await;
        }

        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id).expect("present above");
        entry.record(InstanceState::Stopped);
        drop(entries);

        self.events.publish(ServiceEvent::Stopped {
            instance_id: id.to_string(),
        });
        Ok(())
    }

    /// `restartProcess` = stop + start. On start failure the instance
    /// enters `error` (already handled inside `start_process`).
    pub async fn restart_process(
        &self,
        id: &str,
        client_versions: &[&str],
        client_capabilities: serde_json::Value,
        adapter: Box<dyn Adapter>,
    ) -> Result<ServiceInstance, GatewayError> {
        let template_name = {
            let mut entries = self.entries.lock().await;
            let entry = entries.get_mut(id).ok_or_else(|| GatewayError::InstanceNotFound(id.to_string()))?;
            entry.record(InstanceState::Restarting);
            entry.instance.template_ref.clone()
        };

        self.stop_process(id).await?;
        self.entries.lock().await.remove(id);
        self.start_process(&template_name, client_versions, client_capabilities, adapter)
            .await
    }

    pub async fn get_process_info(&self, id: &str) -> Option<ServiceInstance> {
        self.entries.lock().await.get(id).map(|e| e.instance.clone())
    }

    /// The live protocol session for `id`, if the instance has one
    /// (absent before `start_process` completes or after `stop_process`).
    /// Used by the router to forward a request through a selected
    /// instance without the router owning adapters itself.
    pub async fn protocol(&self, id: &str) -> Option<Arc<Protocol>> {
        self.entries.lock().await.get(id).and_then(|e| e.protocol.clone())
    }

    /// All tracked instances, regardless of state — used by the registry
    /// to build per-template health aggregates and by the router to
    /// enumerate candidates.
    pub async fn list_instances(&self) -> Vec<ServiceInstance> {
        self.entries.lock().await.values().map(|e| e.instance.clone()).collect()
    }

    pub async fn history(&self, id: &str) -> Vec<StateTransition> {
        self.entries
            .lock()
            .await
            .get(id)
            .map(|e| e.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a process-level failure observed by a caller's health-check
    /// loop (exit code or lost-pipe): exit 0 → `stopped`, non-zero/signal
    /// → `crashed`, spawn/pipe errors → `error` (spec §4.3 Failure
    /// semantics). Restart policy itself is the caller's responsibility.
    pub async fn record_exit(&self, id: &str, exit_code: Option<i32>) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else { return };
        match exit_code {
            Some(0) => entry.record(InstanceState::Stopped),
            Some(_) | None => {
                entry.instance.error_count += 1;
                entry.record(InstanceState::Crashed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gw_core::{AdapterEvent, McpMessage, TransportKind};
    use tokio::sync::broadcast;

    struct StubAdapter {
        events_tx: broadcast::Sender<AdapterEvent>,
        fail_handshake: bool,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        async fn connect(&mut self) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn send(&mut self, message: &McpMessage) -> Result<(), GatewayError> {
            let Some(method) = &message.method else { return Ok(()) };
            let Some(id) = message.id.clone() else { return Ok(()) };
            if self.fail_handshake && method == "initialize" {
                let response = McpMessage {
                    jsonrpc: "2.0".to_string(),
                    id: Some(id),
                    method: None,
                    params: None,
                    result: None,
                    error: Some(serde_json::json!({"code": -32000, "message": "boom"})),
                };
                let _ = self.events_tx.send(AdapterEvent::Message(response));
                return Ok(());
            }
            let result = match method.as_str() {
                "initialize" => serde_json::json!({"protocolVersion": "2025-06-18", "capabilities": {}}),
                "tools/list" => serde_json::json!({"tools": []}),
                _ => return Ok(()),
            };
            let response = McpMessage {
                jsonrpc: "2.0".to_string(),
                id: Some(id),
                method: None,
                params: None,
                result: Some(result),
                error: None,
            };
            let _ = self.events_tx.send(AdapterEvent::Message(response));
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

    fn stub(fail_handshake: bool) -> Box<dyn Adapter> {
        let (events_tx, _) = broadcast::channel(64);
        Box::new(StubAdapter { events_tx, fail_handshake })
    }

    #[tokio::test]
    async fn test_start_process_reaches_running() {
        let supervisor = Supervisor::new(Duration::from_secs(2));
        let instance = supervisor
            .start_process("fetch", &["2025-06-18"], serde_json::json!({}), stub(false))
            .await
            .unwrap();
        assert_eq!(instance.state, InstanceState::Running);
        let info = supervisor.get_process_info(&instance.id).await.unwrap();
        assert_eq!(info.state, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_start_process_failure_enters_error_state() {
        let supervisor = Supervisor::new(Duration::from_secs(2));
        let result = supervisor
            .start_process("fetch", &["2025-06-18"], serde_json::json!({}), stub(true))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stop_process_transitions_to_stopped() {
        let supervisor = Supervisor::new(Duration::from_secs(2));
        let instance = supervisor
            .start_process("fetch", &["2025-06-18"], serde_json::json!({}), stub(false))
            .await
            .unwrap();
        supervisor.stop_process(&instance.id).await.unwrap();
        let info = supervisor.get_process_info(&instance.id).await.unwrap();
        assert_eq!(info.state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_history_is_capped_at_ten() {
        let supervisor = Supervisor::new(Duration::from_secs(2));
        let instance = supervisor
            .start_process("fetch", &["2025-06-18"], serde_json::json!({}), stub(false))
            .await
            .unwrap();
        for _ in 0..15 {
            supervisor
                .entries
                .lock()
                .await
                .get_mut(&instance.id)
                .unwrap()
                .record(InstanceState::Running);
        }
        assert_eq!(supervisor.history(&instance.id).await.len(), STATE_HISTORY_CAP);
    }

    #[tokio::test]
    async fn test_record_exit_zero_maps_to_stopped() {
        let supervisor = Supervisor::new(Duration::from_secs(2));
        let instance = supervisor
            .start_process("fetch", &["2025-06-18"], serde_json::json!({}), stub(false))
            .await
            .unwrap();
        supervisor.record_exit(&instance.id, Some(0)).await;
        let info = supervisor.get_process_info(&instance.id).await.unwrap();
        assert_eq!(info.state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_record_exit_nonzero_maps_to_crashed_and_increments_errors() {
        let supervisor = Supervisor::new(Duration::from_secs(2));
        let instance = supervisor
            .start_process("fetch", &["2025-06-18"], serde_json::json!({}), stub(false))
            .await
            .unwrap();
        supervisor.record_exit(&instance.id, Some(1)).await;
        let info = supervisor.get_process_info(&instance.id).await.unwrap();
        assert_eq!(info.state, InstanceState::Crashed);
        assert_eq!(info.error_count, 1);
    }
}
