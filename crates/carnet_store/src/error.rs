//! Error types for the local store.

use crate::entity::SyncState;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity does not exist.
    #[error("entity not found: {local_id}")]
    EntityNotFound {
        /// The local ID that was not found.
        local_id: String,
    },

    /// The requested state change is not part of the sync state machine.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SyncState,
        /// Attempted target state.
        to: SyncState,
    },

    /// A state requires data the entity does not carry.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// No conflict is recorded for the entity.
    #[error("entity {local_id} has no recorded conflict to resolve")]
    NoConflict {
        /// The entity's local ID.
        local_id: String,
    },
}

impl StoreError {
    /// Creates an `EntityNotFound` error.
    pub fn not_found(local_id: impl ToString) -> Self {
        Self::EntityNotFound {
            local_id: local_id.to_string(),
        }
    }

    /// Creates an `InvalidOperation` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::InvalidTransition {
            from: SyncState::Synced,
            to: SyncState::New,
        };
        assert!(err.to_string().contains("Synced"));
        assert!(err.to_string().contains("New"));

        let err = StoreError::not_found("abc");
        assert!(err.to_string().contains("abc"));
    }
}
