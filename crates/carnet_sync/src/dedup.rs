//! Dedup-key convergence shared by the reconciler and the auditor.

use carnet_store::{DedupKey, EntityRecord, LocalStore, StoreResult, SyncState};
use std::collections::HashMap;
use tracing::warn;

/// Flags duplicate dedup-key groups, keeping one winner per group.
///
/// The winner is the member with the earliest non-null remote ID (server
/// IDs are allocated monotonically), or the earliest-created member when
/// none are synced. Losers are marked `Conflict` for manual merge,
/// never deleted. Entities already surfaced as `Conflict` are excluded
/// from grouping so repeated passes converge.
///
/// Returns the number of entities flagged.
pub(crate) fn flag_duplicate_groups(store: &LocalStore) -> StoreResult<usize> {
    let entities = store.all();
    let mut groups: HashMap<DedupKey, Vec<&EntityRecord>> = HashMap::new();
    for entity in &entities {
        if matches!(entity.sync_state, SyncState::Tombstoned | SyncState::Conflict) {
            continue;
        }
        groups.entry(entity.dedup_key()).or_default().push(entity);
    }

    let mut flagged = 0;
    for (key, group) in groups {
        if group.len() < 2 {
            continue;
        }

        let winner = group
            .iter()
            .min_by_key(|e| {
                (
                    e.remote_id.is_none(),
                    e.remote_id.map(|r| r.get()).unwrap_or(u64::MAX),
                    e.created_at,
                )
            })
            .map(|e| e.local_id)
            .unwrap_or(group[0].local_id);

        for loser in group.iter().filter(|e| e.local_id != winner) {
            warn!(
                dedup_key = %key,
                winner = %winner,
                loser = %loser.local_id,
                "duplicate entities; loser flagged for manual merge"
            );
            store.mark_duplicate(&loser.local_id, &winner)?;
            flagged += 1;
        }
    }

    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carnet_store::{EntryPayload, RemoteId, RemoteSnapshot};

    fn payload(name: &str) -> EntryPayload {
        EntryPayload::new(name, "Lyon", "ines")
    }

    #[test]
    fn keeps_the_synced_member() {
        let store = LocalStore::new();
        // A synced copy pulled from the server.
        store
            .merge_remote(RemoteSnapshot {
                remote_id: RemoteId::new(5),
                payload: payload("Le Petit Bistro"),
                version: 1,
                updated_at: 1,
            })
            .unwrap();
        // An independently created local copy.
        let local = store.create(payload("Le Petit Bistro")).unwrap();

        let flagged = flag_duplicate_groups(&store).unwrap();
        assert_eq!(flagged, 1);

        let record = store.get(&local).unwrap();
        assert_eq!(record.sync_state, SyncState::Conflict);
        // Both entities still exist: losers are never deleted.
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn second_pass_finds_nothing() {
        let store = LocalStore::new();
        store.create(payload("Chez Anouk")).unwrap();
        store.create(payload("Chez Anouk")).unwrap();

        assert_eq!(flag_duplicate_groups(&store).unwrap(), 1);
        assert_eq!(flag_duplicate_groups(&store).unwrap(), 0);
    }

    #[test]
    fn distinct_keys_are_untouched() {
        let store = LocalStore::new();
        store.create(payload("A")).unwrap();
        store.create(payload("B")).unwrap();

        assert_eq!(flag_duplicate_groups(&store).unwrap(), 0);
    }
}
