//! Event Bus - pub/sub for queue notifications
//!
//! The EventBus uses a tokio broadcast channel to deliver every queue event to
//! all subscribers. The queue emits; loggers and dashboards subscribe.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::QueueEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central bus for queue lifecycle notifications
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and a full
    /// channel drops the oldest events for slow receivers.
    pub fn emit(&self, event: QueueEvent) {
        debug!(event_type = event.event_type(), cycle = event.cycle(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskId;
    use tokio::sync::broadcast::error::TryRecvError;

    fn started(id: &str) -> QueueEvent {
        QueueEvent::TaskStarted {
            cycle: 1,
            task_id: TaskId::from(id),
        }
    }

    #[test]
    fn test_event_bus_subscribe() {
        let bus = EventBus::new(100);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        bus.emit(started("t1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "TaskStarted");
        assert_eq!(event.task_id(), Some(&TaskId::from("t1")));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(100);
        // Must not panic with nobody listening
        bus.emit(started("t1"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = create_event_bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(started("shared"));

        assert_eq!(rx1.recv().await.unwrap(), started("shared"));
        assert_eq!(rx2.recv().await.unwrap(), started("shared"));
    }
}
