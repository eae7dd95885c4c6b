//! Transport abstraction for the remote entity API.

use crate::error::{RemoteError, RemoteResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// A raw call to the remote API, before any response normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// Create a new remote record.
    Create {
        /// Serialized domain payload.
        payload: Value,
        /// Upload deduplication key.
        idempotency_key: String,
    },
    /// Update an existing remote record with optimistic concurrency.
    Update {
        /// Server-assigned identifier.
        remote_id: u64,
        /// Serialized domain payload.
        payload: Value,
        /// Expected server-side version, when known.
        expected_version: Option<u64>,
        /// Upload deduplication key.
        idempotency_key: String,
    },
    /// Delete a remote record.
    Delete {
        /// Server-assigned identifier.
        remote_id: u64,
        /// Upload deduplication key.
        idempotency_key: String,
    },
    /// List records changed since a cursor.
    ListChangedSince {
        /// Cursor from the last fully merged page.
        cursor: u64,
        /// Page size.
        limit: u32,
    },
}

impl RemoteCall {
    /// Returns the idempotency key carried by mutating calls.
    pub fn idempotency_key(&self) -> Option<&str> {
        match self {
            RemoteCall::Create { idempotency_key, .. }
            | RemoteCall::Update { idempotency_key, .. }
            | RemoteCall::Delete { idempotency_key, .. } => Some(idempotency_key),
            RemoteCall::ListChangedSince { .. } => None,
        }
    }
}

/// An HTTP-level response before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, already parsed as JSON.
    pub body: Value,
}

impl RawResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Creates a 200 response.
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network transport to the remote entity API.
///
/// The real implementation speaks HTTP and lives with the application
/// shell; this crate only needs the raw status and JSON body back. The
/// mock below scripts responses for tests.
pub trait RemoteTransport: Send + Sync + 'static {
    /// Sends one call and returns the raw response.
    ///
    /// Transport-level failures (DNS, connect, reset) surface as
    /// `RemoteError::Network`; deadlines are enforced by the caller.
    fn send(&self, call: RemoteCall) -> impl Future<Output = RemoteResult<RawResponse>> + Send;

    /// Connectivity probe. When false, the reconciler leaves the queue
    /// untouched and attempts no network call.
    fn is_online(&self) -> bool;
}

/// A scripted transport for tests.
///
/// Responses are queued per call kind and consumed FIFO. Every call is
/// recorded so tests can assert on exactly what went over the wire. An
/// unscripted list call yields an empty change page; an unscripted
/// mutating call is a network error, which keeps broken scripts loud.
#[derive(Default)]
pub struct MockTransport {
    online: AtomicBool,
    create_responses: Mutex<VecDeque<RemoteResult<RawResponse>>>,
    update_responses: Mutex<VecDeque<RemoteResult<RawResponse>>>,
    delete_responses: Mutex<VecDeque<RemoteResult<RawResponse>>>,
    list_responses: Mutex<VecDeque<RemoteResult<RawResponse>>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MockTransport {
    /// Creates an online mock with no scripted responses.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Scripts the next create response.
    pub fn enqueue_create(&self, response: RemoteResult<RawResponse>) {
        self.create_responses.lock().push_back(response);
    }

    /// Scripts the next update response.
    pub fn enqueue_update(&self, response: RemoteResult<RawResponse>) {
        self.update_responses.lock().push_back(response);
    }

    /// Scripts the next delete response.
    pub fn enqueue_delete(&self, response: RemoteResult<RawResponse>) {
        self.delete_responses.lock().push_back(response);
    }

    /// Scripts the next change-page response.
    pub fn enqueue_list(&self, response: RemoteResult<RawResponse>) {
        self.list_responses.lock().push_back(response);
    }

    /// Flips the connectivity probe.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns how many calls were made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn pop(
        queue: &Mutex<VecDeque<RemoteResult<RawResponse>>>,
        kind: &str,
    ) -> RemoteResult<RawResponse> {
        queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::network(format!("no scripted {kind} response"))))
    }
}

impl RemoteTransport for MockTransport {
    fn send(&self, call: RemoteCall) -> impl Future<Output = RemoteResult<RawResponse>> + Send {
        self.calls.lock().push(call.clone());

        let result = if !self.online.load(Ordering::SeqCst) {
            Err(RemoteError::network("offline"))
        } else {
            match &call {
                RemoteCall::Create { .. } => Self::pop(&self.create_responses, "create"),
                RemoteCall::Update { .. } => Self::pop(&self.update_responses, "update"),
                RemoteCall::Delete { .. } => Self::pop(&self.delete_responses, "delete"),
                RemoteCall::ListChangedSince { cursor, .. } => {
                    let mut queue = self.list_responses.lock();
                    match queue.pop_front() {
                        Some(response) => response,
                        None => Ok(RawResponse::ok(json!({
                            "records": [],
                            "nextCursor": cursor,
                            "hasMore": false,
                        }))),
                    }
                }
            }
        };

        async move { result }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let transport = MockTransport::new();
        transport.enqueue_create(Ok(RawResponse::ok(json!({"id": 1}))));

        let call = RemoteCall::Create {
            payload: json!({"name": "x"}),
            idempotency_key: "k1".into(),
        };
        transport.send(call.clone()).await.unwrap();

        assert_eq!(transport.calls(), vec![call]);
    }

    #[tokio::test]
    async fn unscripted_mutation_is_a_network_error() {
        let transport = MockTransport::new();
        let result = transport
            .send(RemoteCall::Delete {
                remote_id: 9,
                idempotency_key: "k".into(),
            })
            .await;
        assert!(matches!(result, Err(RemoteError::Network { .. })));
    }

    #[tokio::test]
    async fn unscripted_list_yields_empty_page() {
        let transport = MockTransport::new();
        let response = transport
            .send(RemoteCall::ListChangedSince { cursor: 5, limit: 10 })
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body["nextCursor"], 5);
    }

    #[tokio::test]
    async fn offline_fails_fast() {
        let transport = MockTransport::new();
        transport.set_online(false);
        assert!(!transport.is_online());

        let result = transport
            .send(RemoteCall::ListChangedSince { cursor: 0, limit: 10 })
            .await;
        assert!(matches!(result, Err(RemoteError::Network { .. })));
    }
}
