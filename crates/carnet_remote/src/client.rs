//! Remote client facade: status classification plus normalization.

use crate::error::{RemoteError, RemoteResult};
use crate::normalize::{normalize_ack, normalize_create_ack, parse_change_page, ChangePage, RemoteAck};
use crate::transport::{RawResponse, RemoteCall, RemoteTransport};
use carnet_store::{EntryPayload, IdempotencyKey, RemoteId};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Stateless client for the remote entity API.
///
/// Every response passes through status classification and shape
/// normalization before the reconciler sees it; the reconciler never
/// touches raw JSON.
pub struct RemoteClient<T: RemoteTransport> {
    transport: Arc<T>,
}

impl<T: RemoteTransport> RemoteClient<T> {
    /// Creates a client over a transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Connectivity probe.
    pub fn is_online(&self) -> bool {
        self.transport.is_online()
    }

    /// Creates a remote record. The returned ack always carries an id.
    pub async fn create_remote(
        &self,
        payload: &EntryPayload,
        idempotency_key: &IdempotencyKey,
    ) -> RemoteResult<RemoteAck> {
        let response = self
            .dispatch(RemoteCall::Create {
                payload: encode_payload(payload)?,
                idempotency_key: idempotency_key.to_string(),
            })
            .await?;
        normalize_create_ack(response.status, &response.body)
    }

    /// Updates a remote record with optimistic concurrency.
    pub async fn update_remote(
        &self,
        remote_id: RemoteId,
        payload: &EntryPayload,
        expected_version: Option<u64>,
        idempotency_key: &IdempotencyKey,
    ) -> RemoteResult<RemoteAck> {
        let response = self
            .dispatch(RemoteCall::Update {
                remote_id: remote_id.get(),
                payload: encode_payload(payload)?,
                expected_version,
                idempotency_key: idempotency_key.to_string(),
            })
            .await?;
        normalize_ack(response.status, &response.body)
    }

    /// Deletes a remote record.
    pub async fn delete_remote(
        &self,
        remote_id: RemoteId,
        idempotency_key: &IdempotencyKey,
    ) -> RemoteResult<RemoteAck> {
        let response = self
            .dispatch(RemoteCall::Delete {
                remote_id: remote_id.get(),
                idempotency_key: idempotency_key.to_string(),
            })
            .await?;
        normalize_ack(response.status, &response.body)
    }

    /// Fetches one page of records changed since `cursor`.
    pub async fn list_changed_since(&self, cursor: u64, limit: u32) -> RemoteResult<ChangePage> {
        let response = self
            .dispatch(RemoteCall::ListChangedSince { cursor, limit })
            .await?;
        parse_change_page(cursor, &response.body)
    }

    async fn dispatch(&self, call: RemoteCall) -> RemoteResult<RawResponse> {
        let response = self.transport.send(call).await?;
        debug!(status = response.status, "remote response");
        classify(response)
    }
}

fn encode_payload(payload: &EntryPayload) -> RemoteResult<Value> {
    serde_json::to_value(payload)
        .map_err(|e| RemoteError::ambiguous(format!("unserializable payload: {e}")))
}

/// Converts a non-2xx response into its typed error.
fn classify(response: RawResponse) -> RemoteResult<RawResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let message = error_message(&response.body);
    Err(match response.status {
        401 | 403 => RemoteError::Auth(message),
        409 => RemoteError::Conflict {
            current: crate::normalize::extract_record(&response.body).map(Box::new),
        },
        429 => RemoteError::QuotaExceeded(message),
        400..=499 => RemoteError::Validation(message),
        status => RemoteError::Server { status, message },
    })
}

/// Pulls a human-readable message out of the observed error shapes.
fn error_message(body: &Value) -> String {
    for key in ["error", "message", "detail"] {
        if let Some(message) = body.get(key).and_then(Value::as_str) {
            return message.to_string();
        }
    }
    "no detail provided".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use carnet_store::EntityId;
    use carnet_store::OpKind;
    use serde_json::json;

    fn payload() -> EntryPayload {
        EntryPayload::new("Le Petit Bistro", "Lyon", "ines")
    }

    fn key() -> IdempotencyKey {
        IdempotencyKey::derive(&EntityId::new(), OpKind::Create, 1)
    }

    #[tokio::test]
    async fn create_normalizes_nested_id() {
        let transport = MockTransport::new();
        transport.enqueue_create(Ok(RawResponse::ok(json!({"data": {"id": 42}}))));

        let client = RemoteClient::new(transport);
        let ack = client.create_remote(&payload(), &key()).await.unwrap();
        assert_eq!(ack.remote_id, Some(RemoteId::new(42)));
    }

    #[tokio::test]
    async fn create_without_id_is_ambiguous() {
        let transport = MockTransport::new();
        transport.enqueue_create(Ok(RawResponse::ok(json!({"success": true}))));

        let client = RemoteClient::new(transport);
        let err = client.create_remote(&payload(), &key()).await.unwrap_err();
        assert!(matches!(err, RemoteError::AmbiguousResponse { .. }));
    }

    #[tokio::test]
    async fn update_accepts_flag_only_body() {
        let transport = MockTransport::new();
        transport.enqueue_update(Ok(RawResponse::ok(json!({"ok": true}))));

        let client = RemoteClient::new(transport);
        let ack = client
            .update_remote(RemoteId::new(42), &payload(), Some(3), &key())
            .await
            .unwrap();
        assert_eq!(ack.remote_id, None);
    }

    #[tokio::test]
    async fn statuses_classify_to_typed_errors() {
        let transport = MockTransport::new();
        transport.enqueue_update(Ok(RawResponse::new(401, json!({"error": "expired"}))));
        transport.enqueue_update(Ok(RawResponse::new(422, json!({"message": "bad rating"}))));
        transport.enqueue_update(Ok(RawResponse::new(429, json!({"detail": "daily cap"}))));
        transport.enqueue_update(Ok(RawResponse::new(503, json!({}))));

        let client = RemoteClient::new(transport);
        let id = RemoteId::new(1);

        let err = client.update_remote(id, &payload(), None, &key()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Auth(m) if m == "expired"));

        let err = client.update_remote(id, &payload(), None, &key()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Validation(m) if m == "bad rating"));

        let err = client.update_remote(id, &payload(), None, &key()).await.unwrap_err();
        assert!(matches!(err, RemoteError::QuotaExceeded(m) if m == "daily cap"));

        let err = client.update_remote(id, &payload(), None, &key()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn conflict_carries_current_record() {
        let transport = MockTransport::new();
        transport.enqueue_create(Ok(RawResponse::new(
            409,
            json!({
                "error": "dedup violation",
                "current": {
                    "id": 42,
                    "name": "Le Petit Bistro",
                    "location": "Lyon",
                    "curator": "ines",
                    "version": 2,
                }
            }),
        )));

        let client = RemoteClient::new(transport);
        let err = client.create_remote(&payload(), &key()).await.unwrap_err();
        match err {
            RemoteError::Conflict { current: Some(current) } => {
                assert_eq!(current.remote_id, RemoteId::new(42));
                assert_eq!(current.version, 2);
            }
            other => panic!("expected conflict with record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conflict_without_record_is_still_a_conflict() {
        let transport = MockTransport::new();
        transport.enqueue_create(Ok(RawResponse::new(409, json!({"error": "conflict"}))));

        let client = RemoteClient::new(transport);
        let err = client.create_remote(&payload(), &key()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { current: None }));
    }

    #[tokio::test]
    async fn list_parses_page() {
        let transport = MockTransport::new();
        transport.enqueue_list(Ok(RawResponse::ok(json!({
            "records": [
                {"id": 1, "name": "A", "location": "L", "curator": "c", "version": 1},
                {"id": 2, "name": "B", "location": "L", "curator": "c", "version": 1},
            ],
            "nextCursor": 30,
            "hasMore": false,
        }))));

        let client = RemoteClient::new(transport);
        let page = client.list_changed_since(0, 100).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next_cursor, 30);
    }
}
