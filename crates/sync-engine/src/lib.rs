// crates/sync-engine/src/lib.rs
//! Offline-first dataset synchronization engine
//!
//! Keeps local replicas of named datasets and reconciles them against a
//! remote authority:
//! - Local reads and writes work with or without the network
//! - Local changes queue up and are pushed every `sync_frequency`
//! - Remote changes are applied as deltas
//! - Concurrent edits to the same record are detected as collisions
//! - Pending work survives remote failures and process restarts
//!
//! # Example
//!
//! ```rust
//! use offsync_sync_engine::{DatasetConfig, DatasetManager, EventCode, MemoryRemote};
//! use offsync_storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = DatasetManager::new(
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(MemoryStore::new()),
//!     DatasetConfig::default().with_auto_sync(false),
//! );
//!
//! manager.manage("tasks", None).await.unwrap();
//! let receipt = manager
//!     .do_create("tasks", serde_json::json!({"title": "write docs"}))
//!     .await
//!     .unwrap();
//!
//! manager.force_sync("tasks").await.unwrap();
//!
//! let uid = manager.get_uid(&receipt.hash).await;
//! assert!(uid.is_remote());
//! let record = manager.do_read("tasks", uid.as_str()).await.unwrap();
//! assert_eq!(record.data["title"], "write docs");
//! # manager.shutdown().await;
//! # }
//! ```

mod collision;
mod dataset;
mod error;
mod hash_index;
mod manager;
mod notify;
mod pending;
mod protocol;
mod record_store;
mod remote;
mod sync_loop;
mod types;

pub use collision::{collision_from, detect_collision, CollisionStore};
pub use dataset::{storage_key, DatasetSnapshot};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use hash_index::{content_hash, pending_hash, HashIndex};
pub use manager::DatasetManager;
pub use notify::{EventCode, EventMessage, NotificationBus, SubscriptionId, SyncEvent};
pub use pending::{Enqueued, Mutation, PendingQueue};
pub use protocol::{
    Ack, DatasetOptions, Manifest, ManifestEntry, PendingChange, ReconcileRequest,
    ReconcileResponse, RecordDelta, Remote,
};
pub use record_store::RecordStore;
pub use remote::{MemoryRemote, ServerStatus};
pub use sync_loop::CyclePhase;
pub use types::{
    Action, ChangeReceipt, Collision, CycleOutcome, DatasetConfig, DatasetStatus, PendingEntry,
    Record, RecordId,
};
