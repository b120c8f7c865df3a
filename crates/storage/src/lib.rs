// crates/storage/src/lib.rs
//! Local persistence for offsync
//!
//! The sync engine only needs get/set/remove/clear semantics over string keys
//! and byte values. This crate provides that contract as [`KeyValueStore`]
//! together with three interchangeable strategies:
//! - [`MemoryStore`]: process-local, lost on exit
//! - [`DiskStore`]: one file per key, atomic writes
//! - [`SqliteStore`]: a single SQLite table through sqlx
//!
//! # Example
//!
//! ```rust
//! use offsync_storage::{KeyValueStore, MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryStore::new();
//! store.set("dataset:tasks", b"{}".to_vec()).await.unwrap();
//! assert_eq!(store.get("dataset:tasks").await.unwrap(), Some(b"{}".to_vec()));
//! # }
//! ```

mod disk;
mod error;
mod memory;
pub mod sqlite;

pub use disk::DiskStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::{SqliteConfig, SqliteStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Byte-oriented key-value persistence used by the sync engine
///
/// Implementations may be synchronous underneath; callers always await
/// completion before treating a write as durable.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Removes `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Removes every key
    async fn clear(&self) -> StorageResult<()>;

    /// Lists stored keys in ascending order
    async fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Which backend holds the local replicas
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageStrategy {
    #[default]
    Memory,
    Disk,
    Sqlite,
}

impl std::fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageStrategy::Memory => write!(f, "memory"),
            StorageStrategy::Disk => write!(f, "disk"),
            StorageStrategy::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for StorageStrategy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageStrategy::Memory),
            "disk" | "file" => Ok(StorageStrategy::Disk),
            "sqlite" => Ok(StorageStrategy::Sqlite),
            other => Err(StorageError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Default location used by the disk and sqlite strategies when no path is configured
pub fn default_storage_path(strategy: StorageStrategy) -> PathBuf {
    match strategy {
        StorageStrategy::Sqlite => PathBuf::from("offsync.db"),
        _ => PathBuf::from("offsync-data"),
    }
}

/// Opens a store for the given strategy
///
/// `path` is a directory for [`StorageStrategy::Disk`] and a database file for
/// [`StorageStrategy::Sqlite`]; it is ignored for memory storage.
pub async fn open_store(
    strategy: StorageStrategy,
    path: Option<&Path>,
) -> StorageResult<Arc<dyn KeyValueStore>> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_storage_path(strategy));

    let store: Arc<dyn KeyValueStore> = match strategy {
        StorageStrategy::Memory => Arc::new(MemoryStore::new()),
        StorageStrategy::Disk => Arc::new(DiskStore::open(path).await?),
        StorageStrategy::Sqlite => Arc::new(SqliteStore::open(SqliteConfig::new(path)).await?),
    };

    log::debug!("Opened {} storage", strategy);
    Ok(store)
}
