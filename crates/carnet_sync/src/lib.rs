//! # Carnet Sync
//!
//! Reconciliation engine for Carnet, an offline-first restaurant
//! curation tool.
//!
//! This crate provides:
//! - The reconciler: queue drain with bounded concurrency, retry with
//!   exponential backoff, pull merge, and dedup convergence
//! - Conflict resolution that adopts remote identities where safe and
//!   surfaces real divergence for manual merge
//! - A reentrancy guard coalescing concurrent sync triggers
//! - The integrity auditor with its deterministic repair table
//! - Progress events for the caller/UI layer
//!
//! ## Key Invariants
//!
//! - Same-entity operations upload strictly in submission order
//! - Cancellation stops new work, never an in-flight entity write
//! - Terminal failures settle on the entity; queued data is never lost
//! - Tombstones are never resurrected by a pull

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auditor;
mod cancel;
mod config;
mod dedup;
mod error;
mod events;
mod reconciler;

pub use auditor::{spawn_audit_task, AuditReport, AuditSummary, IntegrityAuditor};
pub use cancel::CancellationToken;
pub use config::{AuditConfig, RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use reconciler::{Reconciler, SyncReport, SyncStats};
