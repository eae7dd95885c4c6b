//! Entity records and the sync state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable local identifier for an entity.
///
/// Local IDs are v4 UUIDs that are:
/// - Assigned at creation time, before the server has seen the entity
/// - Immutable for the lifetime of the record
/// - Never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Server-assigned identifier for an entity.
///
/// Remote IDs are allocated by the remote store on first successful
/// create and are monotonically increasing, so a smaller ID was
/// assigned earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteId(u64);

impl RemoteId {
    /// Creates a remote ID from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RemoteId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Composite natural key used to detect independently created duplicates.
///
/// Two records created on different devices for the same real-world
/// restaurant will not share a local or remote ID, but they will share a
/// dedup key: the case-folded, whitespace-normalized combination of name,
/// location, and owning curator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derives the key from its three components.
    #[must_use]
    pub fn derive(name: &str, location: &str, curator: &str) -> Self {
        Self(format!(
            "{}|{}|{}",
            normalize(name),
            normalize(location),
            normalize(curator)
        ))
    }

    /// Returns the normalized key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Case-folds and collapses internal whitespace.
fn normalize(component: &str) -> String {
    component
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The sync lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    /// Created locally, never acknowledged by the server.
    New,
    /// Has a local mutation queued for upload.
    Pending,
    /// Local and remote agree as of `last_synced_at`.
    Synced,
    /// Diverged from the remote version; both sides retained for manual merge.
    Conflict,
    /// Upload failed terminally; visible to the user, retried only on request.
    Error,
    /// Soft-deleted locally; awaits a remote delete before physical removal.
    Tombstoned,
}

impl SyncState {
    /// Returns true if the state carries unacknowledged local intent.
    pub fn has_local_intent(&self) -> bool {
        matches!(self, SyncState::New | SyncState::Pending)
    }

    /// Returns true if a pull merge may overwrite the entity's payload.
    pub fn accepts_remote_payload(&self) -> bool {
        matches!(self, SyncState::Synced)
    }

    /// Returns true if `next` is a legal transition from this state.
    ///
    /// The table is the single source of truth for the lifecycle; every
    /// store mutation goes through it.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (New, Pending)
                | (New, Synced)
                | (New, Error)
                | (New, Conflict)
                | (Pending, Synced)
                | (Pending, Error)
                | (Pending, Conflict)
                | (Pending, Tombstoned)
                | (Synced, Pending)
                | (Synced, Conflict)
                | (Synced, Tombstoned)
                | (Conflict, Pending)
                | (Conflict, Synced)
                | (Conflict, Tombstoned)
                | (Error, Pending)
                | (Error, Tombstoned)
                | (Tombstoned, Pending)
        )
    }
}

/// Domain fields of a curated restaurant entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    /// Restaurant name.
    pub name: String,
    /// Location (free-form address or neighborhood).
    pub location: String,
    /// Owning curator.
    pub curator: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Cuisine tag, if captured.
    #[serde(default)]
    pub cuisine: Option<String>,
    /// Curator rating, 1-5.
    #[serde(default)]
    pub rating: Option<u8>,
}

impl EntryPayload {
    /// Creates a payload with the three identity fields set.
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        curator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            curator: curator.into(),
            description: String::new(),
            cuisine: None,
            rating: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Derives the dedup key for this payload.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::derive(&self.name, &self.location, &self.curator)
    }
}

/// A record as the remote store reports it.
///
/// Produced by the Remote Client's normalization layer and consumed by
/// pull merges and conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Server-assigned identifier.
    pub remote_id: RemoteId,
    /// Domain fields as the server holds them.
    pub payload: EntryPayload,
    /// Server-side optimistic-concurrency version.
    pub version: u64,
    /// Server-side last-modified time, unix millis.
    pub updated_at: u64,
}

impl RemoteSnapshot {
    /// Derives the dedup key for the remote payload.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        self.payload.dedup_key()
    }
}

/// A locally stored entity with its full sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Stable local identifier.
    pub local_id: EntityId,
    /// Server-assigned identifier, once known.
    pub remote_id: Option<RemoteId>,
    /// Current lifecycle state.
    pub sync_state: SyncState,
    /// Domain fields.
    pub payload: EntryPayload,
    /// Local edit counter; bumped on every payload change.
    pub payload_version: u64,
    /// Server-side version, tracked for optimistic concurrency.
    pub remote_version: Option<u64>,
    /// Creation time, unix millis.
    pub created_at: u64,
    /// Last local modification time, unix millis.
    pub last_modified_at: u64,
    /// Last successful sync acknowledgement, unix millis.
    pub last_synced_at: Option<u64>,
    /// Last terminal error, if any.
    pub last_error: Option<String>,
    /// The diverged remote version, retained while in `Conflict`.
    pub remote_conflict: Option<RemoteSnapshot>,
}

impl EntityRecord {
    /// Creates a fresh `New` record.
    pub fn new(payload: EntryPayload, now: u64) -> Self {
        Self {
            local_id: EntityId::new(),
            remote_id: None,
            sync_state: SyncState::New,
            payload,
            payload_version: 1,
            remote_version: None,
            created_at: now,
            last_modified_at: now,
            last_synced_at: None,
            last_error: None,
            remote_conflict: None,
        }
    }

    /// Derives the dedup key for the current payload.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        self.payload.dedup_key()
    }
}

/// How a user resolved a `Conflict` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local payload and re-queue it for upload.
    KeepLocal,
    /// Adopt the retained remote version and mark the entity synced.
    AcceptRemote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_is_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn dedup_key_normalizes() {
        let a = DedupKey::derive("Le  Petit   Bistro", "Lyon", "ines");
        let b = DedupKey::derive("le petit bistro", "  LYON ", "Ines");
        assert_eq!(a, b);

        let c = DedupKey::derive("Le Petit Bistro", "Paris", "ines");
        assert_ne!(a, c);
    }

    #[test]
    fn dedup_key_from_payload() {
        let payload = EntryPayload::new("Chez Anouk", "Marseille", "marc");
        assert_eq!(
            payload.dedup_key().as_str(),
            "chez anouk|marseille|marc"
        );
    }

    #[test]
    fn transition_table() {
        use SyncState::*;

        assert!(New.can_transition_to(Pending));
        assert!(New.can_transition_to(Synced));
        assert!(Pending.can_transition_to(Synced));
        assert!(Synced.can_transition_to(Pending));
        assert!(Synced.can_transition_to(Tombstoned));
        assert!(Error.can_transition_to(Pending));
        assert!(Tombstoned.can_transition_to(Pending));

        // A tombstone never silently comes back as synced.
        assert!(!Tombstoned.can_transition_to(Synced));
        // A synced entity never regresses to new.
        assert!(!Synced.can_transition_to(New));
        // Errors are returned to the queue before syncing again.
        assert!(!Error.can_transition_to(Synced));
    }

    #[test]
    fn local_intent_states() {
        assert!(SyncState::New.has_local_intent());
        assert!(SyncState::Pending.has_local_intent());
        assert!(!SyncState::Synced.has_local_intent());
        assert!(!SyncState::Tombstoned.has_local_intent());
    }

    #[test]
    fn record_starts_new() {
        let record = EntityRecord::new(EntryPayload::new("A", "B", "c"), 1000);
        assert_eq!(record.sync_state, SyncState::New);
        assert_eq!(record.payload_version, 1);
        assert!(record.remote_id.is_none());
        assert!(record.last_synced_at.is_none());
    }
}
