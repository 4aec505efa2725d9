//! Process-wide lifecycle event bus.
//!
//! Built on `tokio::sync::broadcast`, a single-producer/many-consumer
//! fan-out channel. A single publisher's events are always observed in the
//! order it sent them, since `broadcast::Sender::send` is a synchronous
//! push into a ring buffer; delivery to a lagging subscriber can drop the
//! oldest events (at-least-once delivery to live subscribers).

use grove_shared::{ExitReason, MonitorId, ServerId, ServerRef};
use tokio::sync::broadcast;

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// One of the lifecycle events a server's transitions publish.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started {
        id: ServerId,
        name: Option<String>,
    },
    Restarted {
        id: ServerId,
        attempt: u32,
    },
    Terminated {
        id: ServerId,
        reason: ExitReason,
    },
    ProcessDown {
        monitor: MonitorId,
        watcher: ServerRef,
        target: ServerRef,
        reason: ExitReason,
    },
}

impl LifecycleEvent {
    pub fn subject(&self) -> ServerId {
        match self {
            LifecycleEvent::Started { id, .. } => *id,
            LifecycleEvent::Restarted { id, .. } => *id,
            LifecycleEvent::Terminated { id, .. } => *id,
            LifecycleEvent::ProcessDown { target, .. } => target.id(),
        }
    }
}

/// The bus itself. Cheaply cloneable; every clone shares the same ring
/// buffer and subscriber set.
#[derive(Clone)]
pub struct LifecycleBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event. A "no subscribers" result is not an error: the
    /// spec only requires delivery to subscribers that exist at publish
    /// time.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the bus. Drop the returned receiver (or call
    /// `unsubscribe`, a no-op beyond dropping) to stop receiving events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_from_one_publisher_arrive_in_order() {
        let bus = LifecycleBus::new();
        let mut rx = bus.subscribe();
        let id = ServerId::new();

        bus.publish(LifecycleEvent::Started { id, name: None });
        bus.publish(LifecycleEvent::Restarted { id, attempt: 1 });
        bus.publish(LifecycleEvent::Terminated {
            id,
            reason: ExitReason::Normal,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();

        assert!(matches!(first, LifecycleEvent::Started { .. }));
        assert!(matches!(second, LifecycleEvent::Restarted { attempt: 1, .. }));
        assert!(matches!(third, LifecycleEvent::Terminated { .. }));
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_past_events() {
        let bus = LifecycleBus::new();
        let id = ServerId::new();
        bus.publish(LifecycleEvent::Started { id, name: None });

        let mut rx = bus.subscribe();
        bus.publish(LifecycleEvent::Terminated {
            id,
            reason: ExitReason::Normal,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, LifecycleEvent::Terminated { .. }));
    }
}
