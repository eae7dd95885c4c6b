//! Error types for the remote client.

use carnet_store::RemoteSnapshot;
use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors raised by the remote client.
///
/// The reconciler keys its behavior off these variants: retryable errors
/// go through backoff, `Auth`/`QuotaExceeded` halt the queue, and the
/// rest settle on the affected entity.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure; retryable.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// The call exceeded its deadline; treated like a network failure.
    #[error("request timed out")]
    Timeout,

    /// Credentials rejected; sync halts until re-authentication.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server rejected the payload; surfaced verbatim, never retried.
    #[error("request rejected: {0}")]
    Validation(String),

    /// Optimistic-concurrency or uniqueness conflict.
    #[error("remote conflict")]
    Conflict {
        /// The server's current record, when the response body carried it.
        current: Option<Box<RemoteSnapshot>>,
    },

    /// Upload quota exhausted; halts the queue with an actionable message.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Server-side failure; retryable.
    #[error("server error (status {status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Description from the response body.
        message: String,
    },

    /// The response shape could not be normalized safely. Guessing an id
    /// here would corrupt the local remote-id binding, so this is fatal
    /// for the operation.
    #[error("ambiguous response: {message}")]
    AmbiguousResponse {
        /// What made the response unusable.
        message: String,
    },
}

impl RemoteError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an ambiguous-response error.
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::AmbiguousResponse {
            message: message.into(),
        }
    }

    /// Returns true if the operation may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Network { .. } | RemoteError::Timeout | RemoteError::Server { .. }
        )
    }

    /// Returns true if this error must stop the whole queue rather than
    /// settle on one entity.
    pub fn halts_queue(&self) -> bool {
        matches!(self, RemoteError::Auth(_) | RemoteError::QuotaExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(RemoteError::network("connection reset").is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!RemoteError::Auth("expired token".into()).is_retryable());
        assert!(!RemoteError::Validation("bad rating".into()).is_retryable());
        assert!(!RemoteError::ambiguous("two ids").is_retryable());
    }

    #[test]
    fn halting_errors() {
        assert!(RemoteError::Auth("expired".into()).halts_queue());
        assert!(RemoteError::QuotaExceeded("monthly cap".into()).halts_queue());
        assert!(!RemoteError::Timeout.halts_queue());
    }
}
