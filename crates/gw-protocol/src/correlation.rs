//! Request/response correlation map (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gw_core::{GatewayError, McpMessage};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Canonicalize a JSON-RPC id into a hashable key. Ids are always numbers
/// or strings on the wire; anything else is treated as its JSON text.
pub fn id_key(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct PendingSlot {
    resolver: oneshot::Sender<Result<McpMessage, GatewayError>>,
    timer: JoinHandle<()>,
}

/// Tracks in-flight requests for one service's transport, resolving them
/// on matching response, timeout, cancellation, or disconnect.
#[derive(Clone)]
pub struct CorrelationMap {
    pending: Arc<Mutex<HashMap<String, PendingSlot>>>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a newly-sent request's id, with a timer that rejects it
    /// with `RequestTimeout` if nothing resolves it first.
    pub async fn register(
        &self,
        id: serde_json::Value,
        deadline: Duration,
    ) -> oneshot::Receiver<Result<McpMessage, GatewayError>> {
        let (tx, rx) = oneshot::channel();
        let key = id_key(&id);
        let pending = self.pending.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let mut map = pending.lock().await;
            if let Some(slot) = map.remove(&timer_key) {
                let _ = slot.resolver.send(Err(GatewayError::RequestTimeout(deadline)));
            }
        });

        let mut map = self.pending.lock().await;
        map.insert(key, PendingSlot { resolver: tx, timer });
        rx
    }

    /// Resolve a pending request by its response's id. Returns `false` if
    /// no such pending entry exists (e.g. already timed out).
    pub async fn resolve(&self, message: McpMessage) -> bool {
        let Some(id) = &message.id else { return false };
        let key = id_key(id);
        let mut map = self.pending.lock().await;
        if let Some(slot) = map.remove(&key) {
            slot.timer.abort();
            let _ = slot.resolver.send(Ok(message));
            true
        } else {
            false
        }
    }

    /// Cancel a pending request, rejecting it with `Cancelled`.
    pub async fn cancel(&self, id: &serde_json::Value) -> bool {
        let key = id_key(id);
        let mut map = self.pending.lock().await;
        if let Some(slot) = map.remove(&key) {
            slot.timer.abort();
            let _ = slot.resolver.send(Err(GatewayError::Cancelled));
            true
        } else {
            false
        }
    }

    /// Reject every still-pending request with `ConnectionClosed` (spec
    /// §4.4: "on transport disconnect, all pending entries are rejected").
    pub async fn reject_all_disconnected(&self) {
        let mut map = self.pending.lock().await;
        for (_, slot) in map.drain() {
            slot.timer.abort();
            let _ = slot.resolver.send(Err(GatewayError::ConnectionClosed));
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for CorrelationMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let map = CorrelationMap::new();
        let rx = map.register(json!(1), Duration::from_secs(5)).await;
        let response = McpMessage::request(json!(1), "ignored", json!({}));
        // Reuse `request` just to carry an id; mark it as a response shape.
        let response = McpMessage {
            method: None,
            result: Some(json!({"ok": true})),
            ..response
        };
        assert!(map.resolve(response).await);
        let resolved = rx.await.unwrap().unwrap();
        assert_eq!(resolved.result.unwrap()["ok"], true);
        assert_eq!(map.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_returns_false() {
        let map = CorrelationMap::new();
        let response = McpMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(99)),
            method: None,
            params: None,
            result: Some(json!(0)),
            error: None,
        };
        assert!(!map.resolve(response).await);
    }

    #[tokio::test]
    async fn test_timeout_rejects_pending() {
        let map = CorrelationMap::new();
        let rx = map.register(json!(2), Duration::from_millis(20)).await;
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(GatewayError::RequestTimeout(_))));
    }

    #[tokio::test]
    async fn test_cancel_rejects_pending() {
        let map = CorrelationMap::new();
        let rx = map.register(json!(3), Duration::from_secs(5)).await;
        assert!(map.cancel(&json!(3)).await);
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[tokio::test]
    async fn test_disconnect_rejects_all() {
        let map = CorrelationMap::new();
        let rx1 = map.register(json!(4), Duration::from_secs(5)).await;
        let rx2 = map.register(json!(5), Duration::from_secs(5)).await;
        map.reject_all_disconnected().await;
        assert!(matches!(rx1.await.unwrap(), Err(GatewayError::ConnectionClosed)));
        assert!(matches!(rx2.await.unwrap(), Err(GatewayError::ConnectionClosed)));
    }
}
