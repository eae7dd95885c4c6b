//! The local store: entity records plus the coalescing operation log.
//!
//! All state consumed by the UI layer and the reconciler lives here; there
//! is no second copy anywhere. Every mutation that touches an entity and
//! its pending operation runs inside one critical section over the inner
//! maps, so no observer can ever see an entity `Pending` without its
//! operation or an operation without its entity.

use crate::clock::now_millis;
use crate::entity::{
    ConflictResolution, EntityId, EntityRecord, EntryPayload, RemoteId, RemoteSnapshot, SyncState,
};
use crate::error::{StoreError, StoreResult};
use crate::feed::{StoreEvent, StoreEventKind, StoreFeed};
use crate::op::{IdempotencyKey, OpKind, PendingOperation};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::Receiver;
use tracing::debug;

/// Result of deleting an entity locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Never synced; removed immediately.
    Purged,
    /// Known to the server; tombstoned until the remote delete lands.
    Tombstoned,
}

/// Result of committing an upload acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The acknowledged snapshot was the latest; the operation is consumed.
    Committed,
    /// A newer coalesced snapshot superseded the acknowledged one; the
    /// operation stays queued and only metadata was recorded.
    Superseded,
}

/// Result of merging one pulled remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No local match; inserted as a synced record.
    Inserted,
    /// Local match was synced; payload overwritten.
    Updated,
    /// Local match holds unacknowledged intent; only metadata refreshed.
    LocalKept,
    /// A tombstone shares the dedup key; record ignored.
    SkippedTombstone,
}

#[derive(Default)]
struct StoreInner {
    entities: HashMap<EntityId, EntityRecord>,
    ops: HashMap<EntityId, PendingOperation>,
    /// FIFO order of first intent; one slot per entity with an op.
    queue: VecDeque<EntityId>,
    pull_cursor: u64,
}

impl StoreInner {
    fn record(&self, id: &EntityId) -> StoreResult<&EntityRecord> {
        self.entities.get(id).ok_or_else(|| StoreError::not_found(id))
    }

    fn record_mut(&mut self, id: &EntityId) -> StoreResult<&mut EntityRecord> {
        self.entities
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id))
    }

    fn enqueue(&mut self, op: PendingOperation) {
        let id = op.entity_local_id;
        if self.ops.insert(id, op).is_none() {
            self.queue.push_back(id);
        }
    }

    fn remove_op(&mut self, id: &EntityId) {
        if self.ops.remove(id).is_some() {
            self.queue.retain(|queued| queued != id);
        }
    }

    fn has_tombstone_with_key(&self, key: &crate::entity::DedupKey) -> bool {
        self.entities
            .values()
            .any(|e| e.sync_state == SyncState::Tombstoned && &e.dedup_key() == key)
    }
}

/// The single shared mutable resource of the sync engine.
///
/// `LocalStore` enforces the sync state machine, coalesces successive
/// edits into one outstanding operation per entity, and emits a change
/// feed after each committed mutation. UI edits and reconciler commits
/// both go through this API; the single-writer critical section is what
/// keeps them from corrupting each other.
pub struct LocalStore {
    inner: Mutex<StoreInner>,
    feed: StoreFeed,
}

impl LocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            feed: StoreFeed::new(),
        }
    }

    /// Subscribes to the change feed.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.feed.subscribe()
    }

    // ---- reads ------------------------------------------------------------

    /// Returns a snapshot of one entity.
    pub fn get(&self, id: &EntityId) -> Option<EntityRecord> {
        self.inner.lock().entities.get(id).cloned()
    }

    /// Returns snapshots of all entities.
    pub fn all(&self) -> Vec<EntityRecord> {
        self.inner.lock().entities.values().cloned().collect()
    }

    /// Returns the number of entities, tombstones included.
    pub fn count(&self) -> usize {
        self.inner.lock().entities.len()
    }

    /// Returns snapshots of all entities in the given state.
    pub fn by_state(&self, state: SyncState) -> Vec<EntityRecord> {
        self.inner
            .lock()
            .entities
            .values()
            .filter(|e| e.sync_state == state)
            .cloned()
            .collect()
    }

    /// Returns pending operations in FIFO order of first intent.
    pub fn get_pending(&self) -> Vec<PendingOperation> {
        let inner = self.inner.lock();
        inner
            .queue
            .iter()
            .filter_map(|id| inner.ops.get(id).cloned())
            .collect()
    }

    /// Returns the number of pending operations.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().ops.len()
    }

    /// Returns the pending operation for one entity, if any.
    pub fn pending_for(&self, id: &EntityId) -> Option<PendingOperation> {
        self.inner.lock().ops.get(id).cloned()
    }

    /// Returns the cursor of the last fully merged pull page.
    pub fn pull_cursor(&self) -> u64 {
        self.inner.lock().pull_cursor
    }

    /// Advances the pull cursor. Called only after a page is merged.
    pub fn set_pull_cursor(&self, cursor: u64) {
        self.inner.lock().pull_cursor = cursor;
    }

    // ---- local mutations --------------------------------------------------

    /// Creates an entity and queues its create operation.
    ///
    /// The entity reports `New` until the create is acknowledged or a
    /// further edit moves it to `Pending`.
    pub fn create(&self, payload: EntryPayload) -> StoreResult<EntityId> {
        let now = now_millis();
        let record = EntityRecord::new(payload, now);
        let id = record.local_id;

        {
            let mut inner = self.inner.lock();
            let op = PendingOperation::create(id, record.payload.clone(), record.payload_version, now);
            inner.entities.insert(id, record);
            inner.enqueue(op);
        }

        self.feed.emit(StoreEvent::new(id, StoreEventKind::Created));
        Ok(id)
    }

    /// Applies a local edit, coalescing into any outstanding operation.
    pub fn update(&self, id: &EntityId, payload: EntryPayload) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;

            match record.sync_state {
                SyncState::Tombstoned => {
                    return Err(StoreError::invalid("entity is deleted; restore it first"))
                }
                SyncState::Conflict => {
                    return Err(StoreError::invalid(
                        "entity is in conflict; resolve it before editing",
                    ))
                }
                _ => {}
            }

            let now = now_millis();
            record.payload = payload.clone();
            record.payload_version += 1;
            record.last_modified_at = now;
            let version = record.payload_version;
            let from = record.sync_state;
            let remote_known = record.remote_id.is_some();

            if from != SyncState::Pending {
                record.sync_state = SyncState::Pending;
                record.last_error = None;
                events.push(StoreEvent::new(
                    *id,
                    StoreEventKind::StateChanged {
                        from,
                        to: SyncState::Pending,
                    },
                ));
            }

            if let Some(op) = inner.ops.get_mut(id) {
                op.coalesce(payload, version);
            } else {
                let kind = if remote_known { OpKind::Update } else { OpKind::Create };
                let op = match kind {
                    OpKind::Update => PendingOperation::update(*id, payload, version, now),
                    _ => PendingOperation::create(*id, payload, version, now),
                };
                inner.enqueue(op);
            }

            events.push(StoreEvent::new(*id, StoreEventKind::Updated));
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    /// Deletes an entity: immediate purge when the server never saw it,
    /// tombstone plus queued delete otherwise.
    pub fn delete(&self, id: &EntityId) -> StoreResult<DeleteOutcome> {
        let mut events = Vec::new();
        let outcome;
        {
            let mut inner = self.inner.lock();
            let record = inner.record(id)?;
            let from = record.sync_state;

            if from == SyncState::Tombstoned {
                return Err(StoreError::invalid("entity is already deleted"));
            }

            if record.remote_id.is_none() {
                inner.entities.remove(id);
                inner.remove_op(id);
                events.push(StoreEvent::new(*id, StoreEventKind::Deleted));
                outcome = DeleteOutcome::Purged;
            } else {
                if !from.can_transition_to(SyncState::Tombstoned) {
                    return Err(StoreError::InvalidTransition {
                        from,
                        to: SyncState::Tombstoned,
                    });
                }
                let record = inner.record_mut(id)?;
                record.sync_state = SyncState::Tombstoned;
                record.payload_version += 1;
                record.last_modified_at = now_millis();
                let version = record.payload_version;

                // Coalesce any queued create/update into the delete; the
                // original FIFO position is kept.
                let created_at = inner
                    .ops
                    .get(id)
                    .map(|op| op.created_at)
                    .unwrap_or_else(now_millis);
                let op = PendingOperation::delete(*id, version, created_at);
                inner.enqueue(op);

                events.push(StoreEvent::new(
                    *id,
                    StoreEventKind::StateChanged {
                        from,
                        to: SyncState::Tombstoned,
                    },
                ));
                outcome = DeleteOutcome::Tombstoned;
            }
        }

        self.feed.emit_batch(events);
        Ok(outcome)
    }

    /// Explicitly restores a tombstoned entity and re-queues it.
    pub fn restore(&self, id: &EntityId) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;

            if record.sync_state != SyncState::Tombstoned {
                return Err(StoreError::InvalidTransition {
                    from: record.sync_state,
                    to: SyncState::Pending,
                });
            }

            let now = now_millis();
            record.sync_state = SyncState::Pending;
            record.payload_version += 1;
            record.last_modified_at = now;
            record.last_error = None;
            let version = record.payload_version;
            let payload = record.payload.clone();
            let remote_known = record.remote_id.is_some();

            let created_at = inner
                .ops
                .get(id)
                .map(|op| op.created_at)
                .unwrap_or(now);
            let op = if remote_known {
                PendingOperation::update(*id, payload, version, created_at)
            } else {
                PendingOperation::create(*id, payload, version, created_at)
            };
            inner.enqueue(op);

            events.push(StoreEvent::new(
                *id,
                StoreEventKind::StateChanged {
                    from: SyncState::Tombstoned,
                    to: SyncState::Pending,
                },
            ));
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    /// Returns an errored entity to the queue.
    pub fn retry(&self, id: &EntityId) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;

            if record.sync_state != SyncState::Error {
                return Err(StoreError::InvalidTransition {
                    from: record.sync_state,
                    to: SyncState::Pending,
                });
            }

            record.sync_state = SyncState::Pending;
            record.last_error = None;
            let payload = record.payload.clone();
            let version = record.payload_version;
            let remote_known = record.remote_id.is_some();

            if !inner.ops.contains_key(id) {
                let now = now_millis();
                let op = if remote_known {
                    PendingOperation::update(*id, payload, version, now)
                } else {
                    PendingOperation::create(*id, payload, version, now)
                };
                inner.enqueue(op);
            }

            events.push(StoreEvent::new(
                *id,
                StoreEventKind::StateChanged {
                    from: SyncState::Error,
                    to: SyncState::Pending,
                },
            ));
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    /// Resolves a `Conflict` entity. Neither side is ever discarded
    /// without this explicit call.
    pub fn resolve_conflict(
        &self,
        id: &EntityId,
        resolution: ConflictResolution,
    ) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;

            if record.sync_state != SyncState::Conflict {
                return Err(StoreError::NoConflict {
                    local_id: id.to_string(),
                });
            }

            let now = now_millis();
            match resolution {
                ConflictResolution::KeepLocal => {
                    let snapshot = record.remote_conflict.take();
                    if let Some(snap) = snapshot {
                        // Adopt the remote identity so the re-queued edit
                        // replays as an update, not a duplicate create.
                        if record.remote_id.is_none() {
                            record.remote_id = Some(snap.remote_id);
                            record.remote_version = Some(snap.version);
                        }
                    }
                    record.sync_state = SyncState::Pending;
                    record.payload_version += 1;
                    record.last_modified_at = now;
                    record.last_error = None;
                    let version = record.payload_version;
                    let payload = record.payload.clone();
                    let remote_known = record.remote_id.is_some();

                    let created_at = inner
                        .ops
                        .get(id)
                        .map(|op| op.created_at)
                        .unwrap_or(now);
                    let op = if remote_known {
                        PendingOperation::update(*id, payload, version, created_at)
                    } else {
                        PendingOperation::create(*id, payload, version, created_at)
                    };
                    inner.enqueue(op);

                    events.push(StoreEvent::new(
                        *id,
                        StoreEventKind::StateChanged {
                            from: SyncState::Conflict,
                            to: SyncState::Pending,
                        },
                    ));
                }
                ConflictResolution::AcceptRemote => {
                    let snap = record.remote_conflict.take().ok_or(StoreError::NoConflict {
                        local_id: id.to_string(),
                    })?;
                    record.payload = snap.payload;
                    record.remote_id = Some(snap.remote_id);
                    record.remote_version = Some(snap.version);
                    record.sync_state = SyncState::Synced;
                    record.last_synced_at = Some(now);
                    record.last_modified_at = now;
                    record.last_error = None;
                    inner.remove_op(id);

                    events.push(StoreEvent::new(
                        *id,
                        StoreEventKind::StateChanged {
                            from: SyncState::Conflict,
                            to: SyncState::Synced,
                        },
                    ));
                    events.push(StoreEvent::new(*id, StoreEventKind::Updated));
                }
            }
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    /// Applies a bare, table-validated state change.
    ///
    /// This is the low-level transition primitive; it does no operation
    /// bookkeeping beyond validation.
    pub fn transition(&self, id: &EntityId, to: SyncState) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;
            let from = record.sync_state;

            if from == to {
                return Ok(());
            }
            if !from.can_transition_to(to) {
                return Err(StoreError::InvalidTransition { from, to });
            }
            if to == SyncState::Synced && record.remote_id.is_none() {
                return Err(StoreError::invalid(
                    "cannot mark synced without a remote id",
                ));
            }

            record.sync_state = to;
            if to == SyncState::Synced {
                record.last_synced_at = Some(now_millis());
            }
            events.push(StoreEvent::new(*id, StoreEventKind::StateChanged { from, to }));
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    // ---- reconciler commits -----------------------------------------------

    /// Records a successful create/update acknowledgement.
    ///
    /// The operation is consumed only when `acked_key` still matches the
    /// queued snapshot; an edit that raced the upload keeps the entity
    /// pending with its newer snapshot intact.
    pub fn commit_synced(
        &self,
        id: &EntityId,
        ack_remote_id: Option<RemoteId>,
        ack_version: Option<u64>,
        acked_key: &IdempotencyKey,
    ) -> StoreResult<CommitOutcome> {
        let mut events = Vec::new();
        let outcome;
        {
            let mut inner = self.inner.lock();
            let current_key = inner.ops.get(id).map(|op| op.idempotency_key.clone());

            let record = inner.record_mut(id)?;
            if let Some(rid) = ack_remote_id {
                record.remote_id = Some(rid);
            }
            if let Some(version) = ack_version {
                record.remote_version = Some(version);
            }
            record.last_synced_at = Some(now_millis());

            match current_key {
                Some(key) if key == *acked_key => {
                    if record.remote_id.is_none() {
                        return Err(StoreError::invalid(
                            "sync acknowledged without a remote id",
                        ));
                    }
                    let from = record.sync_state;
                    record.sync_state = SyncState::Synced;
                    record.last_error = None;
                    record.remote_conflict = None;
                    inner.remove_op(id);
                    events.push(StoreEvent::new(
                        *id,
                        StoreEventKind::StateChanged {
                            from,
                            to: SyncState::Synced,
                        },
                    ));
                    outcome = CommitOutcome::Committed;
                }
                Some(_) => {
                    // Superseded: a coalesced edit replaced the snapshot
                    // while the upload was in flight. The intent persists;
                    // a queued create that now has an identity replays as
                    // an update.
                    let remote_known = record.remote_id.is_some();
                    if let Some(op) = inner.ops.get_mut(id) {
                        if remote_known && op.kind == OpKind::Create {
                            op.reshape(OpKind::Update);
                        }
                    }
                    debug!(entity = %id, "acknowledged snapshot superseded by a newer edit");
                    outcome = CommitOutcome::Superseded;
                }
                None => {
                    debug!(entity = %id, "acknowledgement for an already-consumed operation");
                    outcome = CommitOutcome::Superseded;
                }
            }
        }

        self.feed.emit_batch(events);
        Ok(outcome)
    }

    /// Records a successful remote delete; physically removes the entity
    /// unless a restore superseded the tombstone mid-flight.
    pub fn commit_deleted(
        &self,
        id: &EntityId,
        acked_key: &IdempotencyKey,
    ) -> StoreResult<CommitOutcome> {
        let mut events = Vec::new();
        let outcome;
        {
            let mut inner = self.inner.lock();
            if !inner.entities.contains_key(id) {
                inner.remove_op(id);
                return Ok(CommitOutcome::Committed);
            }

            let matches = inner
                .ops
                .get(id)
                .map(|op| op.kind == OpKind::Delete && op.idempotency_key == *acked_key)
                .unwrap_or(false);

            if matches {
                inner.entities.remove(id);
                inner.remove_op(id);
                events.push(StoreEvent::new(*id, StoreEventKind::Deleted));
                outcome = CommitOutcome::Committed;
            } else {
                // A restore raced the delete acknowledgement; the remote
                // record is gone, so the restored entity must be recreated.
                let record = inner.record_mut(id)?;
                record.remote_id = None;
                record.remote_version = None;
                if let Some(op) = inner.ops.get_mut(id) {
                    if op.kind != OpKind::Create {
                        op.reshape(OpKind::Create);
                    }
                }
                debug!(entity = %id, "delete acknowledged after restore; recreating");
                outcome = CommitOutcome::Superseded;
            }
        }

        self.feed.emit_batch(events);
        Ok(outcome)
    }

    /// Adopts a server-side identity discovered during conflict
    /// resolution, reshaping a queued create into an update.
    ///
    /// Returns the reshaped operation for immediate replay.
    pub fn adopt_remote_id(
        &self,
        id: &EntityId,
        remote_id: RemoteId,
        remote_version: Option<u64>,
    ) -> StoreResult<PendingOperation> {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(id)?;

        if let Some(existing) = record.remote_id {
            if existing != remote_id {
                return Err(StoreError::invalid(format!(
                    "entity already bound to remote id {existing}"
                )));
            }
        }
        record.remote_id = Some(remote_id);
        if remote_version.is_some() {
            record.remote_version = remote_version;
        }

        let op = inner
            .ops
            .get_mut(id)
            .ok_or_else(|| StoreError::invalid("no pending operation to reshape"))?;
        if op.kind == OpKind::Create {
            op.reshape(OpKind::Update);
        }
        Ok(op.clone())
    }

    /// Marks an entity's upload as terminally failed. The operation is
    /// retained so no data is lost; `retry` re-queues it.
    pub fn mark_error(&self, id: &EntityId, reason: impl Into<String>) -> StoreResult<()> {
        let reason = reason.into();
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;
            let from = record.sync_state;

            if from != SyncState::Error {
                if !from.can_transition_to(SyncState::Error) {
                    return Err(StoreError::InvalidTransition {
                        from,
                        to: SyncState::Error,
                    });
                }
                record.sync_state = SyncState::Error;
                events.push(StoreEvent::new(
                    *id,
                    StoreEventKind::StateChanged {
                        from,
                        to: SyncState::Error,
                    },
                ));
            }
            record.last_error = Some(reason);
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    /// Marks an entity as diverged, retaining the remote version (when
    /// known) alongside the local one for manual merge.
    pub fn mark_conflict(
        &self,
        id: &EntityId,
        remote: Option<RemoteSnapshot>,
    ) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;
            let from = record.sync_state;

            if from != SyncState::Conflict {
                if !from.can_transition_to(SyncState::Conflict) {
                    return Err(StoreError::InvalidTransition {
                        from,
                        to: SyncState::Conflict,
                    });
                }
                record.sync_state = SyncState::Conflict;
                events.push(StoreEvent::new(
                    *id,
                    StoreEventKind::StateChanged {
                        from,
                        to: SyncState::Conflict,
                    },
                ));
            }
            if remote.is_some() {
                record.remote_conflict = remote;
            }
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    /// Flags an entity as a duplicate of `winner` during a dedup pass.
    /// The loser is marked `Conflict` for manual merge, never deleted.
    pub fn mark_duplicate(&self, id: &EntityId, winner: &EntityId) -> StoreResult<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let record = inner.record_mut(id)?;
            let from = record.sync_state;

            if from != SyncState::Conflict {
                if !from.can_transition_to(SyncState::Conflict) {
                    return Err(StoreError::InvalidTransition {
                        from,
                        to: SyncState::Conflict,
                    });
                }
                record.sync_state = SyncState::Conflict;
                events.push(StoreEvent::new(
                    *id,
                    StoreEventKind::StateChanged {
                        from,
                        to: SyncState::Conflict,
                    },
                ));
            }
            record.last_error = Some(format!("duplicate of {winner}"));
        }

        self.feed.emit_batch(events);
        Ok(())
    }

    /// Merges one pulled remote record into the store.
    pub fn merge_remote(&self, snapshot: RemoteSnapshot) -> StoreResult<MergeOutcome> {
        let mut events = Vec::new();
        let outcome;
        {
            let mut inner = self.inner.lock();
            let key = snapshot.dedup_key();

            // A tombstone with this key blocks resurrection outright.
            if inner.has_tombstone_with_key(&key) {
                debug!(dedup_key = %key, "pulled record matches a tombstone; skipped");
                return Ok(MergeOutcome::SkippedTombstone);
            }

            let matched = inner
                .entities
                .values()
                .find(|e| e.remote_id == Some(snapshot.remote_id))
                .or_else(|| {
                    inner
                        .entities
                        .values()
                        .find(|e| e.sync_state != SyncState::Tombstoned && e.dedup_key() == key)
                })
                .map(|e| e.local_id);

            match matched {
                Some(id) => {
                    let has_op = inner.ops.contains_key(&id);
                    let record = inner.record_mut(&id)?;
                    if record.sync_state.accepts_remote_payload() && !has_op {
                        record.payload = snapshot.payload;
                        record.remote_id = Some(snapshot.remote_id);
                        record.remote_version = Some(snapshot.version);
                        record.last_modified_at = snapshot.updated_at;
                        record.last_synced_at = Some(snapshot.updated_at);
                        events.push(StoreEvent::new(id, StoreEventKind::Updated));
                        outcome = MergeOutcome::Updated;
                    } else {
                        // Unsynced local edit (or surfaced conflict/error)
                        // takes precedence; refresh metadata only.
                        record.remote_version = Some(snapshot.version);
                        record.last_synced_at = Some(snapshot.updated_at);
                        outcome = MergeOutcome::LocalKept;
                    }
                }
                None => {
                    let now = now_millis();
                    let mut record = EntityRecord::new(snapshot.payload, now);
                    record.remote_id = Some(snapshot.remote_id);
                    record.remote_version = Some(snapshot.version);
                    record.sync_state = SyncState::Synced;
                    record.last_modified_at = snapshot.updated_at;
                    record.last_synced_at = Some(snapshot.updated_at);
                    let id = record.local_id;
                    inner.entities.insert(id, record);
                    events.push(StoreEvent::new(id, StoreEventKind::Created));
                    outcome = MergeOutcome::Inserted;
                }
            }
        }

        self.feed.emit_batch(events);
        Ok(outcome)
    }

    /// Synthesizes the missing operation for an entity that claims local
    /// intent. Used by integrity repair; returns true if one was created.
    pub fn synthesize_op(&self, id: &EntityId) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.ops.contains_key(id) {
            return Ok(false);
        }
        let record = inner.record(id)?;
        let payload = record.payload.clone();
        let version = record.payload_version;
        let kind = match (record.sync_state, record.remote_id) {
            (SyncState::Tombstoned, Some(_)) => OpKind::Delete,
            (_, Some(_)) => OpKind::Update,
            (_, None) => OpKind::Create,
        };
        let now = now_millis();
        let op = match kind {
            OpKind::Create => PendingOperation::create(*id, payload, version, now),
            OpKind::Update => PendingOperation::update(*id, payload, version, now),
            OpKind::Delete => PendingOperation::delete(*id, version, now),
        };
        inner.enqueue(op);
        Ok(true)
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}
