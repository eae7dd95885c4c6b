//! Pending operations and idempotency keys.

use crate::entity::{EntityId, EntryPayload};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;

/// The kind of mutation a pending operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// First upload of a locally created entity.
    Create,
    /// Upload of an edit to an entity the server already knows.
    Update,
    /// Remote deletion of a tombstoned entity.
    Delete,
}

impl OpKind {
    /// Converts to a stable numeric code for hashing.
    pub fn to_code(&self) -> u8 {
        match self {
            OpKind::Create => 1,
            OpKind::Update => 2,
            OpKind::Delete => 3,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Create => write!(f, "create"),
            OpKind::Update => write!(f, "update"),
            OpKind::Delete => write!(f, "delete"),
        }
    }
}

/// Deduplication key sent with every upload.
///
/// The key is a SHA-256 over (entity local ID, operation kind, snapshot
/// version), so replaying the same queued operation produces the same key
/// and the server can collapse duplicate submissions, while a coalesced
/// newer snapshot produces a fresh key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives the key for an operation.
    #[must_use]
    pub fn derive(entity: &EntityId, kind: OpKind, snapshot_version: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(entity.as_uuid().as_bytes());
        hasher.update([kind.to_code()]);
        hasher.update(snapshot_version.to_le_bytes());

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Returns the hex-encoded key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A queued local mutation awaiting upload.
///
/// At most one pending operation exists per entity; successive local
/// edits coalesce into it rather than appending (the snapshot always
/// reflects the latest local truth, the intent to sync persists until
/// acknowledged).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// The entity this operation belongs to.
    pub entity_local_id: EntityId,
    /// Mutation kind.
    pub kind: OpKind,
    /// Payload at the time of the last coalesced edit. `None` for deletes.
    pub payload_snapshot: Option<EntryPayload>,
    /// The entity's `payload_version` captured by the snapshot.
    pub snapshot_version: u64,
    /// Enqueue time of the original intent, unix millis. Preserved across
    /// coalescing so queue order stays FIFO by first intent.
    pub created_at: u64,
    /// Upload deduplication key for this snapshot.
    pub idempotency_key: IdempotencyKey,
}

impl PendingOperation {
    fn new(
        entity_local_id: EntityId,
        kind: OpKind,
        payload_snapshot: Option<EntryPayload>,
        snapshot_version: u64,
        created_at: u64,
    ) -> Self {
        let idempotency_key = IdempotencyKey::derive(&entity_local_id, kind, snapshot_version);
        Self {
            entity_local_id,
            kind,
            payload_snapshot,
            snapshot_version,
            created_at,
            idempotency_key,
        }
    }

    /// Creates a queued create.
    pub fn create(
        entity_local_id: EntityId,
        payload: EntryPayload,
        snapshot_version: u64,
        created_at: u64,
    ) -> Self {
        Self::new(
            entity_local_id,
            OpKind::Create,
            Some(payload),
            snapshot_version,
            created_at,
        )
    }

    /// Creates a queued update.
    pub fn update(
        entity_local_id: EntityId,
        payload: EntryPayload,
        snapshot_version: u64,
        created_at: u64,
    ) -> Self {
        Self::new(
            entity_local_id,
            OpKind::Update,
            Some(payload),
            snapshot_version,
            created_at,
        )
    }

    /// Creates a queued delete.
    pub fn delete(entity_local_id: EntityId, snapshot_version: u64, created_at: u64) -> Self {
        Self::new(entity_local_id, OpKind::Delete, None, snapshot_version, created_at)
    }

    /// Replaces the snapshot with a newer local state, rederiving the key.
    ///
    /// The original `created_at` is kept so the operation holds its FIFO
    /// position in the queue.
    pub fn coalesce(&mut self, payload: EntryPayload, snapshot_version: u64) {
        self.payload_snapshot = Some(payload);
        self.snapshot_version = snapshot_version;
        self.idempotency_key =
            IdempotencyKey::derive(&self.entity_local_id, self.kind, snapshot_version);
    }

    /// Changes the operation kind in place, rederiving the key.
    ///
    /// Used when a queued create adopts a remote identity and must be
    /// replayed as an update.
    pub fn reshape(&mut self, kind: OpKind) {
        self.kind = kind;
        self.idempotency_key =
            IdempotencyKey::derive(&self.entity_local_id, kind, self.snapshot_version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> EntryPayload {
        EntryPayload::new("Le Petit Bistro", "Lyon", "ines")
    }

    #[test]
    fn key_is_stable_for_same_inputs() {
        let id = EntityId::new();
        let a = IdempotencyKey::derive(&id, OpKind::Create, 1);
        let b = IdempotencyKey::derive(&id, OpKind::Create, 1);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn key_changes_with_version_and_kind() {
        let id = EntityId::new();
        let base = IdempotencyKey::derive(&id, OpKind::Create, 1);
        assert_ne!(base, IdempotencyKey::derive(&id, OpKind::Create, 2));
        assert_ne!(base, IdempotencyKey::derive(&id, OpKind::Update, 1));
        assert_ne!(base, IdempotencyKey::derive(&EntityId::new(), OpKind::Create, 1));
    }

    #[test]
    fn coalesce_rederives_key_and_keeps_position() {
        let id = EntityId::new();
        let mut op = PendingOperation::create(id, payload(), 1, 500);
        let original_key = op.idempotency_key.clone();

        let mut edited = payload();
        edited.description = "new tasting menu".into();
        op.coalesce(edited.clone(), 2);

        assert_eq!(op.kind, OpKind::Create);
        assert_eq!(op.created_at, 500);
        assert_eq!(op.snapshot_version, 2);
        assert_eq!(op.payload_snapshot, Some(edited));
        assert_ne!(op.idempotency_key, original_key);
    }

    #[test]
    fn reshape_to_update() {
        let id = EntityId::new();
        let mut op = PendingOperation::create(id, payload(), 3, 500);
        let create_key = op.idempotency_key.clone();

        op.reshape(OpKind::Update);
        assert_eq!(op.kind, OpKind::Update);
        assert_eq!(op.snapshot_version, 3);
        assert_ne!(op.idempotency_key, create_key);
    }
}
