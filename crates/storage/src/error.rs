//! Error types for local persistence

use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing the local store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to read a stored value
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a stored value
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create the storage directory
    #[error("Failed to create storage directory at {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// SQLite backend failure
    #[error("Database error: {message}: {source}")]
    Database {
        message: String,
        source: sqlx::Error,
    },

    /// The key cannot be stored by this backend
    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),

    /// Unknown storage strategy tag
    #[error("Unknown storage strategy: {0}")]
    UnknownStrategy(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Wraps a sqlx error with context
    pub fn database(message: &str, source: sqlx::Error) -> Self {
        Self::Database {
            message: message.to_string(),
            source,
        }
    }
}
