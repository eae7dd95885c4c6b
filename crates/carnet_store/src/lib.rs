//! # Carnet Store
//!
//! Local store for the Carnet sync engine.
//!
//! This crate provides:
//! - Durable per-entity records with an explicit sync state machine
//! - An append-only, per-entity-coalescing pending-operation log
//! - Idempotency keys derived from each queued snapshot
//! - A change feed so every consumer observes one source of truth
//!
//! ## Key Invariants
//!
//! - A `Pending` entity has exactly one coalesced operation
//! - A `Synced` entity carries a remote ID and no newer operation
//! - A `Tombstoned` entity is never resurrected by a pull merge
//! - Entity and operation mutate together inside one critical section

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod entity;
mod error;
mod feed;
mod op;
mod store;

pub use clock::now_millis;
pub use entity::{
    ConflictResolution, DedupKey, EntityId, EntityRecord, EntryPayload, RemoteId, RemoteSnapshot,
    SyncState,
};
pub use error::{StoreError, StoreResult};
pub use feed::{StoreEvent, StoreEventKind, StoreFeed};
pub use op::{IdempotencyKey, OpKind, PendingOperation};
pub use store::{CommitOutcome, DeleteOutcome, LocalStore, MergeOutcome};
