use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A domain event emitted after a durable state transition. Delivery is
/// at-least-once; consumers are expected to be idempotent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    ResourceCreated {
        resource_id: String,
        timestamp: DateTime<Utc>,
    },
    ResourceCompleted {
        resource_id: String,
        timestamp: DateTime<Utc>,
    },
    ResourceFailed {
        resource_id: String,
        timestamp: DateTime<Utc>,
        fields_changed: Vec<String>,
    },
    ResourceDeleted {
        resource_id: String,
        timestamp: DateTime<Utc>,
    },
    ResourceQualityComputed {
        resource_id: String,
        timestamp: DateTime<Utc>,
        fields_changed: Vec<String>,
    },
}

impl DomainEvent {
    pub fn resource_id(&self) -> &str {
        match self {
            DomainEvent::ResourceCreated { resource_id, .. }
            | DomainEvent::ResourceCompleted { resource_id, .. }
            | DomainEvent::ResourceFailed { resource_id, .. }
            | DomainEvent::ResourceDeleted { resource_id, .. }
            | DomainEvent::ResourceQualityComputed { resource_id, .. } => resource_id,
        }
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Process-wide event bus. A single owning instance is held by the
/// coordinator rather than scattered singletons; new subscribers each
/// get their own lagging-tolerant receiver.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes an event. Returns the number of active subscribers that
    /// received it; a publish with zero subscribers is not an error.
    pub fn publish(&self, event: DomainEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ResourceCreated {
            resource_id: "r1".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.resource_id(), "r1");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        let delivered = bus.publish(DomainEvent::ResourceDeleted {
            resource_id: "r1".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(delivered, 0);
    }
}
