//! Error types for the sync engine.

use satchel_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with a non-success status.
    #[error("server returned status {status}")]
    Http {
        /// The HTTP status code.
        status: u16,
    },

    /// A network call exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// A sync cycle is already in flight.
    #[error("a sync cycle is already running")]
    Busy,

    /// Connectivity or the wifi-only policy forbids syncing right now.
    #[error("network unavailable or blocked by policy")]
    NetworkUnavailable,

    /// A write would replay an equal-or-lower version than the stored one.
    #[error("stale write for entity {entity_id}: version {attempted} <= stored {current}")]
    StaleWrite {
        /// The entity being written.
        entity_id: String,
        /// The version the write carried.
        attempted: u64,
        /// The version already stored.
        current: u64,
    },

    /// Storage error during sync.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No conflict with the given id is queued.
    #[error("no conflict with id {0}")]
    ConflictNotFound(String),

    /// No entity with the given id is stored.
    #[error("no entity with id {0}")]
    EntityNotFound(String),

    /// A `merge` resolution was requested without a merged payload.
    #[error("merge resolution requires a merged payload")]
    MergeRequired,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Http { status } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error must abort checkpointing for the cycle.
    ///
    /// Storage and serialization failures are fatal for the operation that
    /// hit them; network problems are not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Storage(_) | SyncError::Serialization(_))
    }
}
