//! Typed publish/subscribe topics (spec §9 design note: "Event emitters ->
//! typed channels + subscriptions").
//!
//! Each component that used to be an emitter instead exposes a `Topic<T>`:
//! a thin wrapper over `tokio::sync::broadcast` that subscribers `.subscribe()`
//! to. There is no global emitter and no back-pointer from adapter to
//! supervisor — the supervisor subscribes on construction and drops its
//! receiver on destroy.

use tokio::sync::broadcast;

/// Supervisor-level lifecycle events (spec §4.3).
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Started { instance_id: String },
    Stopped { instance_id: String },
    Error { instance_id: String, message: String },
}

/// Transport adapter events (spec §4.2 shared contract).
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Message(crate::McpMessage),
    Sent(crate::McpMessage),
    /// A single stderr line, hinted when it looks like a missing
    /// environment variable complaint (spec §4.2.a).
    Stderr { line: String, env_hint: bool },
    Disconnect,
    Error(String),
}

/// A named topic: publishers call `publish`, subscribers call `subscribe`.
/// Lagging subscribers drop old events rather than block publishers.
pub struct Topic<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Publish, ignoring the "no subscribers" case (a topic with nobody
    /// listening is not an error).
    pub fn publish(&self, event: T) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for Topic<T> {
    fn default() -> Self {
        Self::new(256)
    }
}
