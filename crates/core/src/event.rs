//! Domain event system — decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the pipeline.
//! Subscribers (logging, the doctor command, tests) react without coupling
//! to the components that emit them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A normalized message was committed to the store
    MessageStored {
        conversation_id: String,
        role: String,
        token_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// An inbound event was dropped by the normalizer
    MessageDropped {
        conversation_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A job was accepted by the scheduler
    JobQueued {
        job_id: String,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A job reached a terminal state
    JobFinished {
        job_id: String,
        conversation_id: String,
        status: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A reply (or fallback notice) was handed to the gateway
    ReplyDelivered {
        conversation_id: String,
        chunks: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::JobFinished {
            job_id: "j-1".into(),
            conversation_id: "chan-1".into(),
            status: "succeeded".into(),
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::JobFinished { status, .. } => {
                assert_eq!(status, "succeeded");
            }
            _ => panic!("Expected JobFinished event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
