//! Normalization of heterogeneous remote response shapes.
//!
//! The remote entity API has grown across endpoint versions: some return
//! the new id at the top level, some nest it under `data`/`result`/
//! `record`, some under a different field name, and some return only a
//! generic success flag. Everything is converted here into one canonical
//! contract before it reaches the reconciler. A shape that cannot be
//! normalized safely raises `RemoteError::AmbiguousResponse`; an id is
//! never guessed.

use crate::error::{RemoteError, RemoteResult};
use carnet_store::{EntryPayload, RemoteId, RemoteSnapshot};
use serde_json::Value;

/// Field names observed carrying the record id.
const ID_KEYS: [&str; 5] = ["id", "remoteId", "remote_id", "entityId", "entity_id"];

/// Containers observed wrapping the interesting object one level deep.
const NEST_KEYS: [&str; 4] = ["data", "result", "record", "entity"];

/// Field names observed carrying the concurrency version.
const VERSION_KEYS: [&str; 3] = ["version", "revision", "etag"];

/// Field names observed carrying the server-side modification time.
const UPDATED_KEYS: [&str; 4] = ["updatedAt", "updated_at", "modifiedAt", "last_modified"];

/// Canonical result of a mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAck {
    /// Server-assigned identifier, when the response carried one.
    pub remote_id: Option<RemoteId>,
    /// How the server reported the outcome.
    pub status: AckStatus,
    /// Server-side version after the mutation, when reported.
    pub version: Option<u64>,
}

/// How the server acknowledged a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Applied synchronously.
    Ok,
    /// Accepted for asynchronous processing (202).
    Accepted,
}

/// One page of the remote change listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePage {
    /// Records changed since the requested cursor.
    pub records: Vec<RemoteSnapshot>,
    /// Cursor to request the next page with.
    pub next_cursor: u64,
    /// Whether more pages are available.
    pub has_more: bool,
}

/// Reads a `u64` out of a JSON number or a numeric string.
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Objects worth scanning: the body itself plus known one-level nests.
fn scan_targets(body: &Value) -> Vec<&Value> {
    let mut targets = vec![body];
    for key in NEST_KEYS {
        if let Some(nested) = body.get(key) {
            if nested.is_object() {
                targets.push(nested);
            }
        }
    }
    targets
}

/// Collects distinct id candidates across all observed shapes.
fn candidate_ids(body: &Value) -> Vec<u64> {
    let mut ids = Vec::new();
    for target in scan_targets(body) {
        for key in ID_KEYS {
            if let Some(found) = target.get(key).and_then(as_u64) {
                if !ids.contains(&found) {
                    ids.push(found);
                }
            }
        }
    }
    ids
}

fn extract_version(body: &Value) -> Option<u64> {
    scan_targets(body)
        .into_iter()
        .find_map(|target| VERSION_KEYS.iter().find_map(|key| target.get(*key).and_then(as_u64)))
}

fn extract_updated_at(body: &Value) -> Option<u64> {
    scan_targets(body)
        .into_iter()
        .find_map(|target| UPDATED_KEYS.iter().find_map(|key| target.get(*key).and_then(as_u64)))
}

/// Reads an explicit success flag, where one exists.
fn success_flag(body: &Value) -> Option<bool> {
    for key in ["success", "ok"] {
        if let Some(flag) = body.get(key).and_then(Value::as_bool) {
            return Some(flag);
        }
    }
    None
}

/// Normalizes a 2xx mutation response into the canonical ack.
pub fn normalize_ack(status: u16, body: &Value) -> RemoteResult<RemoteAck> {
    if success_flag(body) == Some(false) {
        return Err(RemoteError::ambiguous(
            "success status with a failing body flag",
        ));
    }

    let ids = candidate_ids(body);
    let remote_id = match ids.as_slice() {
        [] => None,
        [one] => Some(RemoteId::new(*one)),
        many => {
            return Err(RemoteError::ambiguous(format!(
                "multiple distinct id candidates: {many:?}"
            )))
        }
    };

    let ack_status = if status == 202 {
        AckStatus::Accepted
    } else {
        AckStatus::Ok
    };

    Ok(RemoteAck {
        remote_id,
        status: ack_status,
        version: extract_version(body),
    })
}

/// Normalizes a create response, which must yield an id.
///
/// A create acknowledged without any recoverable id cannot be committed:
/// binding a guessed id would corrupt the local record permanently.
pub fn normalize_create_ack(status: u16, body: &Value) -> RemoteResult<RemoteAck> {
    let ack = normalize_ack(status, body)?;
    if ack.remote_id.is_none() {
        return Err(RemoteError::ambiguous(
            "create acknowledged without a recoverable id",
        ));
    }
    Ok(ack)
}

/// Extracts the domain payload from a record object, flat or nested.
fn extract_payload(object: &Value) -> Option<EntryPayload> {
    for key in ["payload", "fields", "attributes"] {
        if let Some(nested) = object.get(key) {
            if let Ok(payload) = serde_json::from_value::<EntryPayload>(nested.clone()) {
                return Some(payload);
            }
        }
    }
    serde_json::from_value(object.clone()).ok()
}

/// Extracts a full remote record from a response object, trying the body
/// itself and the containers conflict bodies have been seen to use.
pub fn extract_record(body: &Value) -> Option<RemoteSnapshot> {
    let mut targets = vec![body];
    for key in ["current", "existing", "record", "data", "entity"] {
        if let Some(nested) = body.get(key) {
            if nested.is_object() {
                targets.push(nested);
            }
        }
    }

    for target in targets {
        let ids = candidate_ids(target);
        let [id] = ids.as_slice() else { continue };
        let Some(payload) = extract_payload(target) else {
            continue;
        };
        return Some(RemoteSnapshot {
            remote_id: RemoteId::new(*id),
            payload,
            version: extract_version(target).unwrap_or(0),
            updated_at: extract_updated_at(target).unwrap_or(0),
        });
    }
    None
}

/// Parses one page of the change listing.
///
/// `cursor` is the requested cursor, used as the next cursor when the
/// body omits one and reports no further pages.
pub fn parse_change_page(cursor: u64, body: &Value) -> RemoteResult<ChangePage> {
    let entries = ["records", "items", "changes", "data", "results"]
        .into_iter()
        .find_map(|key| body.get(key).and_then(Value::as_array))
        .ok_or_else(|| RemoteError::ambiguous("change page without a record array"))?;

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        let record = extract_record(entry)
            .ok_or_else(|| RemoteError::ambiguous("unparseable record in change page"))?;
        records.push(record);
    }

    let next_cursor = ["nextCursor", "next_cursor", "cursor"]
        .into_iter()
        .find_map(|key| body.get(key).and_then(as_u64));

    let has_more = ["hasMore", "has_more", "more"]
        .into_iter()
        .find_map(|key| body.get(key).and_then(Value::as_bool))
        .unwrap_or(false);

    let next_cursor = match next_cursor {
        Some(c) => c,
        None if !has_more => cursor,
        None => {
            return Err(RemoteError::ambiguous(
                "change page claims more data but carries no cursor",
            ))
        }
    };

    Ok(ChangePage {
        records,
        next_cursor,
        has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ack_with_top_level_id() {
        let ack = normalize_ack(200, &json!({"id": 42})).unwrap();
        assert_eq!(ack.remote_id, Some(RemoteId::new(42)));
        assert_eq!(ack.status, AckStatus::Ok);
    }

    #[test]
    fn ack_with_renamed_id() {
        let ack = normalize_ack(201, &json!({"remoteId": 7, "success": true})).unwrap();
        assert_eq!(ack.remote_id, Some(RemoteId::new(7)));
    }

    #[test]
    fn ack_with_nested_id_and_version() {
        let ack =
            normalize_ack(200, &json!({"data": {"entity_id": 9, "version": 3}})).unwrap();
        assert_eq!(ack.remote_id, Some(RemoteId::new(9)));
        assert_eq!(ack.version, Some(3));
    }

    #[test]
    fn ack_with_string_id() {
        let ack = normalize_ack(200, &json!({"result": {"id": "31"}})).unwrap();
        assert_eq!(ack.remote_id, Some(RemoteId::new(31)));
    }

    #[test]
    fn ack_with_flag_only_has_no_id() {
        let ack = normalize_ack(200, &json!({"success": true})).unwrap();
        assert_eq!(ack.remote_id, None);
    }

    #[test]
    fn accepted_status() {
        let ack = normalize_ack(202, &json!({"id": 1})).unwrap();
        assert_eq!(ack.status, AckStatus::Accepted);
    }

    #[test]
    fn agreeing_duplicate_ids_are_fine() {
        let ack = normalize_ack(200, &json!({"id": 5, "data": {"id": 5}})).unwrap();
        assert_eq!(ack.remote_id, Some(RemoteId::new(5)));
    }

    #[test]
    fn conflicting_ids_are_ambiguous() {
        let err = normalize_ack(200, &json!({"id": 5, "data": {"id": 6}})).unwrap_err();
        assert!(matches!(err, RemoteError::AmbiguousResponse { .. }));
    }

    #[test]
    fn failing_flag_inside_success_is_ambiguous() {
        let err = normalize_ack(200, &json!({"success": false, "id": 3})).unwrap_err();
        assert!(matches!(err, RemoteError::AmbiguousResponse { .. }));
    }

    #[test]
    fn create_requires_an_id() {
        let err = normalize_create_ack(200, &json!({"success": true})).unwrap_err();
        assert!(matches!(err, RemoteError::AmbiguousResponse { .. }));

        let ack = normalize_create_ack(200, &json!({"id": 42})).unwrap();
        assert_eq!(ack.remote_id, Some(RemoteId::new(42)));
    }

    #[test]
    fn record_from_flat_object() {
        let record = extract_record(&json!({
            "id": 10,
            "name": "Le Petit Bistro",
            "location": "Lyon",
            "curator": "ines",
            "version": 4,
            "updatedAt": 1_700_000_000_000u64,
        }))
        .unwrap();
        assert_eq!(record.remote_id, RemoteId::new(10));
        assert_eq!(record.payload.name, "Le Petit Bistro");
        assert_eq!(record.version, 4);
    }

    #[test]
    fn record_from_conflict_container() {
        let record = extract_record(&json!({
            "error": "duplicate",
            "current": {
                "remote_id": 11,
                "payload": {"name": "Chez Anouk", "location": "Marseille", "curator": "marc"},
                "revision": 2,
            }
        }))
        .unwrap();
        assert_eq!(record.remote_id, RemoteId::new(11));
        assert_eq!(record.payload.curator, "marc");
        assert_eq!(record.version, 2);
    }

    #[test]
    fn record_missing_identity_fields_is_none() {
        assert!(extract_record(&json!({"id": 3, "name": "only a name"})).is_none());
        assert!(extract_record(&json!({"message": "no record here"})).is_none());
    }

    #[test]
    fn change_page_variants() {
        let body = json!({
            "items": [
                {"id": 1, "name": "A", "location": "B", "curator": "c", "version": 1},
            ],
            "next_cursor": 17,
            "has_more": true,
        });
        let page = parse_change_page(5, &body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_cursor, 17);
        assert!(page.has_more);
    }

    #[test]
    fn change_page_without_cursor_falls_back_when_done() {
        let body = json!({"records": [], "hasMore": false});
        let page = parse_change_page(9, &body).unwrap();
        assert_eq!(page.next_cursor, 9);
        assert!(!page.has_more);
    }

    #[test]
    fn change_page_with_more_but_no_cursor_is_ambiguous() {
        let body = json!({"records": [], "hasMore": true});
        assert!(matches!(
            parse_change_page(0, &body),
            Err(RemoteError::AmbiguousResponse { .. })
        ));
    }

    #[test]
    fn change_page_with_bad_record_is_ambiguous() {
        let body = json!({"records": [{"garbage": true}], "nextCursor": 1});
        assert!(matches!(
            parse_change_page(0, &body),
            Err(RemoteError::AmbiguousResponse { .. })
        ));
    }
}
