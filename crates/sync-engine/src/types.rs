// crates/sync-engine/src/types.rs
//! Core sync types and data structures

use chrono::{DateTime, Utc};
use offsync_config::SyncSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Identity of a record
///
/// A record created on this client is known by the hash of its create
/// entry until the remote acknowledges it and assigns a uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum RecordId {
    /// Temporary identifier: the hash of the pending create
    Local(String),
    /// Authoritative identifier assigned by the remote
    Remote(String),
}

impl RecordId {
    /// Returns the identifier as a string
    pub fn as_str(&self) -> &str {
        match self {
            RecordId::Local(hash) => hash,
            RecordId::Remote(uid) => uid,
        }
    }

    /// Returns true once the remote has assigned a uid
    pub fn is_remote(&self) -> bool {
        matches!(self, RecordId::Remote(_))
    }

    /// Returns true while the record only exists locally
    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of mutation carried by a pending entry or a remote delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Record was created
    Create,
    /// Record was updated
    Update,
    /// Record was deleted
    Delete,
}

impl Action {
    /// Lowercase name, as used in notifications
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record known to the local replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Current identity
    pub id: RecordId,
    /// Opaque payload
    pub data: Value,
    /// Content hash of `data`
    pub hash: String,
}

/// A local mutation waiting for the remote to acknowledge it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Key of the entry, unique per mutation
    pub hash: String,
    /// What the mutation does
    pub action: Action,
    /// Record the mutation applies to
    pub uid: RecordId,
    /// Payload before the mutation (`None` for creates)
    pub pre: Option<Value>,
    /// Hash the remote is expected to hold before applying
    pub pre_hash: Option<String>,
    /// Payload after the mutation (`None` for deletes)
    pub post: Option<Value>,
    /// Hash of `post`
    pub post_hash: Option<String>,
    /// When the mutation was made
    pub timestamp: DateTime<Utc>,
    /// Enqueue order within the dataset
    pub seq: u64,
    /// Sent by a cycle and not yet acknowledged
    pub in_flight: bool,
    /// Failed `crashed_count_wait` consecutive cycles
    pub crashed: bool,
    /// Number of cycles that carried this entry
    pub attempt_count: u32,
    /// Consecutive failed cycles while in flight
    pub failed_count: u32,
    /// Held back until `waiting_for` is settled
    pub delayed: bool,
    /// Hash of the in-flight entry this one queues behind
    pub waiting_for: Option<String>,
}

impl PendingEntry {
    /// Returns true if the entry will be sent by the next cycle
    pub fn is_sendable(&self) -> bool {
        !self.delayed
    }
}

/// A local change that could not be applied because the remote moved on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collision {
    /// Hash of the local pending entry that collided
    pub hash: String,
    /// Record both sides touched
    pub uid: String,
    /// What the local change tried to do
    pub action: Action,
    /// Payload the client attempted to push
    pub local: Option<Value>,
    /// Hash of `local`
    pub local_hash: Option<String>,
    /// Pre-image hash the local change was based on
    pub expected_hash: Option<String>,
    /// Payload the remote currently holds (`None` if deleted remotely)
    pub remote: Option<Value>,
    /// Hash of `remote`
    pub remote_hash: Option<String>,
    /// When the collision was detected
    pub detected_at: DateTime<Utc>,
}

/// What a local mutation returns to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReceipt {
    /// Identifier to use for subsequent calls
    pub uid: RecordId,
    /// Hash of the pending entry created for the mutation
    pub hash: String,
    /// Mutation kind
    pub action: Action,
    /// Payload after the mutation
    pub post: Option<Value>,
}

/// Whether the loop runs automatic cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetStatus {
    /// Only `force_sync` triggers cycles
    Stopped,
    /// Cycles run every `sync_frequency`
    Active,
}

/// Result of a forced cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Remote answered and its response was applied
    Completed,
    /// Cycle failed with the given code
    Failed(String),
    /// Another cycle was already running, or the dataset was cleared
    Skipped,
}

/// Per-dataset sync settings
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetConfig {
    /// Interval between automatic cycles
    pub sync_frequency: Duration,
    /// Consecutive failures before an entry is marked crashed
    pub crashed_count_wait: u32,
    /// Time allowed for one remote exchange
    pub request_timeout: Duration,
    /// Start in the active state when managed
    pub auto_sync: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for DatasetConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            sync_frequency: settings.sync_frequency(),
            crashed_count_wait: settings.crashed_count_wait.max(1),
            request_timeout: settings.request_timeout(),
            auto_sync: settings.auto_sync,
        }
    }
}

impl DatasetConfig {
    /// Sets the cycle interval
    pub fn with_sync_frequency(mut self, frequency: Duration) -> Self {
        self.sync_frequency = frequency;
        self
    }

    /// Sets the crash threshold; zero is treated as one
    pub fn with_crashed_count_wait(mut self, count: u32) -> Self {
        self.crashed_count_wait = count.max(1);
        self
    }

    /// Sets the remote request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets whether the loop starts active
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }
}
