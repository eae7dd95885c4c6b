//! Error types for the sync engine.

use carnet_remote::RemoteError;
use carnet_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can terminate a sync operation.
///
/// Per-entity problems (validation failures, ambiguous responses,
/// conflicts) never surface here; they settle on the entity and are
/// counted in the cycle report. These variants are for failures of the
/// cycle itself.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store rejected a mutation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote call failed in a way that aborts the cycle.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The cycle was cancelled between entity-level operations.
    #[error("sync cancelled")]
    Cancelled,

    /// This caller coalesced onto an in-flight cycle that failed.
    #[error("coalesced sync cycle failed: {0}")]
    CoalescedCycleFailed(String),
}

impl SyncError {
    /// Returns true if the failure is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_remote_taxonomy() {
        assert!(SyncError::from(RemoteError::Timeout).is_retryable());
        assert!(!SyncError::from(RemoteError::Auth("expired".into())).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }
}
