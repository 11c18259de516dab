//! Error types for the Converge engine.

use crate::storage::StorageError;
use crate::sync::TransportError;
use thiserror::Error;

/// All possible errors from the Converge engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Clock errors
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid node id '{0}': expected 16 hex characters")]
    InvalidNodeId(String),

    #[error("clock counter overflow at millis {millis}")]
    CounterOverflow { millis: u64 },

    #[error("invalid clock state: {0}")]
    InvalidClock(String),

    // Message errors
    #[error("malformed message at index {index}: {reason}")]
    MalformedMessage { index: usize, reason: String },

    // Collaborator errors
    #[error("storage write failed: {0}")]
    Storage(#[from] StorageError),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("sync abandoned after {attempts} attempts: {last_error}")]
    SyncAbandoned {
        attempts: u32,
        last_error: TransportError,
    },

    #[error("sync session cancelled")]
    Cancelled,

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
