use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::clock::Clock;

/// Bound of every subscriber's queue. A consumer that falls further behind
/// loses the oldest events and observes the gap via `Lagged`.
pub const SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "todo:created")]
    TodoCreated,
    #[serde(rename = "todo:updated")]
    TodoUpdated,
    #[serde(rename = "todo:deleted")]
    TodoDeleted,
    #[serde(rename = "message:created")]
    MessageCreated,
    #[serde(rename = "sprint:created")]
    SprintCreated,
    #[serde(rename = "sprint:updated")]
    SprintUpdated,
    #[serde(rename = "agent:status")]
    AgentStatus,
    #[serde(rename = "project:updated")]
    ProjectUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TodoCreated => "todo:created",
            EventKind::TodoUpdated => "todo:updated",
            EventKind::TodoDeleted => "todo:deleted",
            EventKind::MessageCreated => "message:created",
            EventKind::SprintCreated => "sprint:created",
            EventKind::SprintUpdated => "sprint:updated",
            EventKind::AgentStatus => "agent:status",
            EventKind::ProjectUpdated => "project:updated",
        }
    }
}

/// One state-change notification pushed at connected dashboards. The payload
/// is opaque to the bus.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp_ms: u64,
}

/// In-process topic publisher. `publish` never blocks on subscribers; slow
/// consumers drop their oldest queued events and are told how many they lost.
pub struct EventBus {
    tx: broadcast::Sender<DashboardEvent>,
    clock: Clock,
}

impl EventBus {
    pub fn new(clock: Clock) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_QUEUE);
        Self { tx, clock }
    }

    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        let event = DashboardEvent {
            kind,
            payload,
            timestamp_ms: self.clock.now_ms(),
        };
        // Send only fails when nobody is subscribed, which is fine.
        if self.tx.send(event).is_err() {
            debug!("bus event {} had no subscribers", kind.as_str());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new(Clock::new());
        let mut rx = bus.subscribe();

        bus.publish(EventKind::AgentStatus, json!({"agent_id": "a1"}));
        bus.publish(EventKind::TodoUpdated, json!({"id": "t1"}));

        assert_eq!(rx.recv().await?.kind, EventKind::AgentStatus);
        assert_eq!(rx.recv().await?.kind, EventKind::TodoUpdated);
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_observes_gap() {
        let bus = EventBus::new(Clock::new());
        let mut rx = bus.subscribe();

        for i in 0..(SUBSCRIBER_QUEUE + 10) {
            bus.publish(EventKind::TodoUpdated, json!({ "i": i }));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n as usize, 10),
            other => panic!("expected lag marker, got {other:?}"),
        }
        // After the gap the subscriber resumes from the oldest retained event.
        let next = rx.recv().await.unwrap();
        assert_eq!(next.payload["i"], 10);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_block() {
        let bus = EventBus::new(Clock::new());
        bus.publish(EventKind::MessageCreated, json!({}));
    }
}
