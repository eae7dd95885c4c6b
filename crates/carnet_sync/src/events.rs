//! Sync progress events for the caller/UI layer.
//!
//! The engine reports through this bus instead of logging or blocking on
//! acknowledgement; a subscriber that goes away is dropped on the next
//! emit.

use crate::reconciler::SyncReport;
use carnet_store::EntityId;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Progress and outcome events emitted during sync.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A full sync cycle started.
    Started,
    /// Upload progress across the pending queue.
    Progress {
        /// Operations finished so far.
        done: usize,
        /// Operations in this drain.
        total: usize,
    },
    /// A full sync cycle finished.
    Completed(SyncReport),
    /// One entity's upload settled in an error or conflict.
    EntityError {
        /// The entity affected.
        entity_id: EntityId,
        /// Human-readable reason, surfaced verbatim.
        reason: String,
    },
}

/// Fan-out bus for [`SyncEvent`]s.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all live subscribers.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fans_out() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.emit(SyncEvent::Progress { done: 1, total: 3 });

        for rx in [rx1, rx2] {
            match rx.recv().unwrap() {
                SyncEvent::Progress { done, total } => {
                    assert_eq!(done, 1);
                    assert_eq!(total, 3);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn dead_subscribers_are_dropped() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        bus.emit(SyncEvent::Started);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
