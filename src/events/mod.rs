//! In-process change feed for realtime dashboard updates.
//!
//! Handlers publish a `ChangeEvent` after a write commits. WebSocket
//! subscribers receive every event and forward the ones addressed to them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// A row-level change, shaped like a database change-stream message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub action: ChangeAction,
    pub record_id: String,
    /// Profile ids allowed to see this event; admins see everything
    #[serde(skip_serializing)]
    #[serde(default)]
    pub audience: Vec<String>,
    pub at: String,
}

impl ChangeEvent {
    pub fn new(table: &str, action: ChangeAction, record_id: &str) -> Self {
        Self {
            table: table.to_string(),
            action,
            record_id: record_id.to_string(),
            audience: Vec::new(),
            at: crate::db::now_rfc3339(),
        }
    }

    pub fn to<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audience.extend(users.into_iter().map(Into::into));
        self
    }

    pub fn is_visible_to(&self, user_id: &str, is_admin: bool) -> bool {
        is_admin || self.audience.iter().any(|u| u == user_id)
    }
}

/// Sender half shared through `AppState`
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ChangeEvent) {
        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        tracing::debug!(
            table = %event.table,
            action = ?event.action,
            record_id = %event.record_id,
            receivers,
            "Change event published"
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility() {
        let event = ChangeEvent::new("class_sessions", ChangeAction::Update, "c1").to(["s1", "t1"]);
        assert!(event.is_visible_to("s1", false));
        assert!(event.is_visible_to("t1", false));
        assert!(!event.is_visible_to("s2", false));
        assert!(event.is_visible_to("s2", true));
    }

    #[test]
    fn test_audience_not_serialized() {
        let event = ChangeEvent::new("notifications", ChangeAction::Insert, "n1").to(["s1"]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["table"], "notifications");
        assert_eq!(json["action"], "insert");
        assert!(json.get("audience").is_none());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        bus.publish(ChangeEvent::new("profiles", ChangeAction::Update, "nobody-listening"));

        let mut rx = bus.subscribe();
        bus.publish(ChangeEvent::new("profiles", ChangeAction::Update, "p1").to(["p1"]));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.record_id, "p1");
    }
}
