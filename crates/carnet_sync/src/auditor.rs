//! Integrity auditor: deterministic repair of invariant violations.

use crate::config::AuditConfig;
use crate::dedup::flag_duplicate_groups;
use carnet_store::{LocalStore, StoreResult, SyncState};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Per-rule counts from one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSummary {
    /// Entities examined.
    pub entities_checked: usize,
    /// Entities promoted to `Synced` (had an identity, claimed `New`).
    pub promoted_synced: usize,
    /// Entities demoted to `Pending` (claimed `Synced` wrongly).
    pub demoted_pending: usize,
    /// Operations synthesized for entities that claimed intent without one.
    pub synthesized_ops: usize,
    /// Entities flagged as dedup-key duplicates.
    pub duplicates_flagged: usize,
    /// Entities sitting in `Conflict`, reported but never auto-resolved.
    pub conflicts_open: usize,
    /// Entities sitting in `Error`, reported but never auto-resolved.
    pub errors_open: usize,
}

/// Result of one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Total repairs applied.
    pub repaired: usize,
    /// Per-rule breakdown.
    pub summary: AuditSummary,
}

/// Checks every entity against the store invariants and applies the
/// repair table.
///
/// Repairs are deterministic and idempotent: running `audit` twice in
/// immediate succession reports zero repairs on the second pass.
/// `Conflict` and `Error` entities are counted but never auto-resolved;
/// those states exist precisely to wait for the user.
pub struct IntegrityAuditor {
    store: Arc<LocalStore>,
}

impl IntegrityAuditor {
    /// Creates an auditor over a store.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Runs one audit pass, applying every repair the table prescribes.
    pub fn audit(&self) -> StoreResult<AuditReport> {
        let mut summary = AuditSummary::default();
        let entities = self.store.all();
        summary.entities_checked = entities.len();

        for record in &entities {
            let id = record.local_id;
            let op = self.store.pending_for(&id);

            match (record.sync_state, record.remote_id, &op) {
                // Acknowledged identity but still claims New with nothing
                // queued: the commit was recorded halfway. Promote.
                (SyncState::New, Some(_), None) => {
                    warn!(entity = %id, before = ?SyncState::New, after = ?SyncState::Synced, "repair: promoting acknowledged entity");
                    self.store.transition(&id, SyncState::Synced)?;
                    summary.promoted_synced += 1;
                }
                // Claims Synced without an identity: demote and re-queue.
                (SyncState::Synced, None, _) => {
                    warn!(entity = %id, before = ?SyncState::Synced, after = ?SyncState::Pending, "repair: synced entity without a remote id");
                    self.store.transition(&id, SyncState::Pending)?;
                    summary.demoted_pending += 1;
                    if self.store.synthesize_op(&id)? {
                        summary.synthesized_ops += 1;
                    }
                }
                // Claims Synced while an operation is still queued: the
                // queued intent is newer than the acknowledgement. Demote.
                (SyncState::Synced, Some(_), Some(_)) => {
                    warn!(entity = %id, before = ?SyncState::Synced, after = ?SyncState::Pending, "repair: synced entity with a queued operation");
                    self.store.transition(&id, SyncState::Pending)?;
                    summary.demoted_pending += 1;
                }
                // Claims intent but has nothing queued: synthesize from
                // the current payload.
                (SyncState::Pending | SyncState::New, _, None) => {
                    warn!(entity = %id, state = ?record.sync_state, "repair: synthesizing missing operation");
                    if self.store.synthesize_op(&id)? {
                        summary.synthesized_ops += 1;
                    }
                }
                // A synced tombstone must hold its delete until the
                // remote record is gone.
                (SyncState::Tombstoned, Some(_), None) => {
                    warn!(entity = %id, "repair: synthesizing missing delete for tombstone");
                    if self.store.synthesize_op(&id)? {
                        summary.synthesized_ops += 1;
                    }
                }
                (SyncState::Conflict, _, _) => summary.conflicts_open += 1,
                (SyncState::Error, _, _) => summary.errors_open += 1,
                _ => {}
            }
        }

        summary.duplicates_flagged = flag_duplicate_groups(&self.store)?;

        let repaired = summary.promoted_synced
            + summary.demoted_pending
            + summary.synthesized_ops
            + summary.duplicates_flagged;

        info!(
            checked = summary.entities_checked,
            repaired,
            conflicts_open = summary.conflicts_open,
            errors_open = summary.errors_open,
            "integrity audit complete"
        );

        Ok(AuditReport { repaired, summary })
    }
}

/// Schedules the startup audit (after a short delay so the store can
/// finish initializing) and optional periodic re-audits.
pub fn spawn_audit_task(auditor: Arc<IntegrityAuditor>, config: AuditConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(config.startup_delay).await;
        run_logged(&auditor);

        if let Some(every) = config.interval {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately; the startup audit
            // already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                run_logged(&auditor);
            }
        }
    })
}

fn run_logged(auditor: &IntegrityAuditor) {
    match auditor.audit() {
        Ok(report) => info!(repaired = report.repaired, "scheduled audit finished"),
        Err(e) => warn!(error = %e, "scheduled audit failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carnet_store::{EntryPayload, OpKind, RemoteId, RemoteSnapshot};
    use std::time::Duration;

    fn payload(name: &str) -> EntryPayload {
        EntryPayload::new(name, "Lyon", "ines")
    }

    fn synced_entity(store: &LocalStore, name: &str, remote_id: u64) -> carnet_store::EntityId {
        let id = store.create(payload(name)).unwrap();
        let op = store.pending_for(&id).unwrap();
        store
            .commit_synced(&id, Some(RemoteId::new(remote_id)), Some(1), &op.idempotency_key)
            .unwrap();
        id
    }

    #[test]
    fn clean_store_needs_no_repairs() {
        let store = Arc::new(LocalStore::new());
        synced_entity(&store, "A", 1);
        store.create(payload("B")).unwrap();

        let auditor = IntegrityAuditor::new(Arc::clone(&store));
        let report = auditor.audit().unwrap();
        assert_eq!(report.repaired, 0);
        assert_eq!(report.summary.entities_checked, 2);
    }

    #[test]
    fn audit_reaches_a_fixed_point() {
        let store = Arc::new(LocalStore::new());
        // Two independently created duplicates plus a healthy entity.
        store.create(payload("Le Petit Bistro")).unwrap();
        store.create(payload("Le Petit Bistro")).unwrap();
        synced_entity(&store, "Chez Anouk", 4);

        let auditor = IntegrityAuditor::new(Arc::clone(&store));
        let first = auditor.audit().unwrap();
        assert!(first.repaired > 0);

        let second = auditor.audit().unwrap();
        assert_eq!(second.repaired, 0, "second consecutive audit must be clean");
    }

    #[test]
    fn flags_duplicates_without_deleting() {
        let store = Arc::new(LocalStore::new());
        store.create(payload("Le Petit Bistro")).unwrap();
        store.create(payload("Le Petit Bistro")).unwrap();

        let auditor = IntegrityAuditor::new(Arc::clone(&store));
        let report = auditor.audit().unwrap();
        assert_eq!(report.summary.duplicates_flagged, 1);
        assert_eq!(store.count(), 2);
        assert_eq!(store.by_state(SyncState::Conflict).len(), 1);
    }

    #[test]
    fn counts_open_conflicts_and_errors_without_touching_them() {
        let store = Arc::new(LocalStore::new());
        let conflicted = store.create(payload("A")).unwrap();
        store
            .mark_conflict(
                &conflicted,
                Some(RemoteSnapshot {
                    remote_id: RemoteId::new(3),
                    payload: payload("A"),
                    version: 1,
                    updated_at: 0,
                }),
            )
            .unwrap();
        let errored = store.create(payload("B")).unwrap();
        store.mark_error(&errored, "validation failed").unwrap();

        let auditor = IntegrityAuditor::new(Arc::clone(&store));
        let report = auditor.audit().unwrap();

        assert_eq!(report.summary.conflicts_open, 1);
        assert_eq!(report.summary.errors_open, 1);
        assert_eq!(report.repaired, 0);
        assert_eq!(store.get(&conflicted).unwrap().sync_state, SyncState::Conflict);
        assert_eq!(store.get(&errored).unwrap().sync_state, SyncState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_audit_runs_after_delay() {
        let store = Arc::new(LocalStore::new());
        store.create(payload("Le Petit Bistro")).unwrap();
        store.create(payload("Le Petit Bistro")).unwrap();

        let auditor = Arc::new(IntegrityAuditor::new(Arc::clone(&store)));
        let handle = spawn_audit_task(Arc::clone(&auditor), AuditConfig::new());

        // Before the startup delay nothing has been touched.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.by_state(SyncState::Conflict).len(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.by_state(SyncState::Conflict).len(), 1);

        handle.abort();
    }

    #[test]
    fn synthesizes_op_for_bare_pending() {
        let store = Arc::new(LocalStore::new());
        let id = synced_entity(&store, "A", 9);
        // A bare transition claims intent without queueing anything.
        store.transition(&id, SyncState::Pending).unwrap();
        assert_eq!(store.pending_count(), 0);

        let auditor = IntegrityAuditor::new(Arc::clone(&store));
        let report = auditor.audit().unwrap();
        assert_eq!(report.summary.synthesized_ops, 1);

        let op = store.pending_for(&id).unwrap();
        assert_eq!(op.kind, OpKind::Update);
        assert_eq!(auditor.audit().unwrap().repaired, 0);
    }

    #[test]
    fn demotes_synced_entity_with_queued_op() {
        let store = Arc::new(LocalStore::new());
        let id = synced_entity(&store, "A", 9);
        store
            .update(&id, payload("A").with_description("newer than the ack"))
            .unwrap();
        // A bare transition back to Synced leaves the queued op newer
        // than the acknowledgement.
        store.transition(&id, SyncState::Synced).unwrap();

        let auditor = IntegrityAuditor::new(Arc::clone(&store));
        let report = auditor.audit().unwrap();
        assert_eq!(report.summary.demoted_pending, 1);
        assert_eq!(store.get(&id).unwrap().sync_state, SyncState::Pending);
        assert_eq!(auditor.audit().unwrap().repaired, 0);
    }
}
