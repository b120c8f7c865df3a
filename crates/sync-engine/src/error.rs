// crates/sync-engine/src/error.rs
//! Error types for sync operations

use offsync_storage::StorageError;
use thiserror::Error;

/// Result type for dataset operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for calls into the remote authority
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned to callers of the dataset API
///
/// Remote failures never appear here; they are reported as `sync_failed`
/// notifications and retried by the loop.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The dataset was never managed, or has been cleared since
    #[error("unknown_dataset {0}")]
    UnknownDataset(String),

    /// No record with that identifier exists in the dataset
    #[error("unknown_uid")]
    UnknownUid,

    /// Local persistence failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A std lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Failures of a reconciliation exchange
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never reached the remote
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status
    #[error("Remote returned status {0}")]
    Status(u16),

    /// No answer within the configured request timeout
    #[error("Remote request timed out")]
    Timeout,

    /// Network access is currently switched off
    #[error("Client is offline")]
    Offline,

    /// The remote has no dataset with that id
    #[error("Remote has no dataset {0}")]
    UnknownDataset(String),
}

impl RemoteError {
    /// Short code used as the `sync_failed` message
    pub fn code(&self) -> String {
        match self {
            RemoteError::Transport(_) => "transport_error".to_string(),
            RemoteError::Status(status) => format!("status_{}", status),
            RemoteError::Timeout => "timeout".to_string(),
            RemoteError::Offline => "offline".to_string(),
            RemoteError::UnknownDataset(_) => "unknown_dataset".to_string(),
        }
    }
}
