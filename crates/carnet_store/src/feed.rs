//! Change feed for observing committed store mutations.
//!
//! The feed is the single observation point for the store: UI layers and
//! the reconciler subscribe here instead of duplicating state in their own
//! caches. Events are emitted only after a mutation has committed.

use crate::entity::{EntityId, SyncState};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    /// Entity was inserted.
    Created,
    /// Entity payload changed.
    Updated,
    /// Entity was physically removed.
    Deleted,
    /// Entity moved between sync states.
    StateChanged {
        /// State before the mutation.
        from: SyncState,
        /// State after the mutation.
        to: SyncState,
    },
}

/// A single committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// The entity affected.
    pub entity_id: EntityId,
    /// What happened.
    pub kind: StoreEventKind,
}

impl StoreEvent {
    /// Creates an event.
    pub fn new(entity_id: EntityId, kind: StoreEventKind) -> Self {
        Self { entity_id, kind }
    }
}

/// Distributes committed mutations to subscribers.
///
/// Disconnected subscribers are dropped on the next emit, so a consumer
/// that goes away never blocks the store.
#[derive(Default)]
pub struct StoreFeed {
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
}

impl StoreFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all live subscribers.
    pub fn emit(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Emits a batch of events from one committed mutation.
    pub fn emit_batch(&self, events: Vec<StoreEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn emit_and_receive() {
        let feed = StoreFeed::new();
        let rx = feed.subscribe();

        let event = StoreEvent::new(EntityId::new(), StoreEventKind::Created);
        feed.emit(event.clone());

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received, event);
    }

    #[test]
    fn multiple_subscribers() {
        let feed = StoreFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        let event = StoreEvent::new(EntityId::new(), StoreEventKind::Deleted);
        feed.emit(event.clone());

        assert_eq!(rx1.recv().unwrap(), event);
        assert_eq!(rx2.recv().unwrap(), event);
    }

    #[test]
    fn disconnected_subscriber_cleanup() {
        let feed = StoreFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(StoreEvent::new(EntityId::new(), StoreEventKind::Created));
        assert_eq!(feed.subscriber_count(), 0);
    }
}
