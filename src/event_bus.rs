use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Depth of the broadcast ring buffer. A subscriber that falls this far
/// behind observes a `Lagged` error on its next `recv` and is treated as
/// silently evicted: it resubscribes and only loses the events it missed,
/// never old payloads it already saw.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// In-process publish/subscribe fan-out. Single-process only, not persisted.
/// Delivery is best-effort: losing an event never affects correctness because
/// nothing downstream of this bus is a source of truth.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Never fails the caller: with zero subscribers
    /// `send` returns an error that we simply log and ignore, matching the
    /// spec's "best-effort, no backpressure to publishers" contract.
    pub fn publish(&self, event_type: impl Into<String>, data: Value) {
        let event = Event {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        };
        if self.sender.send(event).is_err() {
            debug!("event published with no active subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish("job_created", json!({"job_id": "abc"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "job_created");
        assert_eq!(event.data["job_id"], "abc");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish("agent_registered", json!({}));
    }

    #[tokio::test]
    async fn lagging_subscriber_observes_lagged_not_stale_payloads() {
        let (sender, mut rx) = broadcast::channel::<Event>(2);
        for i in 0..5 {
            let _ = sender.send(Event {
                event_type: format!("e{i}"),
                data: json!({}),
                timestamp: Utc::now(),
            });
        }
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, broadcast::error::RecvError::Lagged(_)));
    }
}
