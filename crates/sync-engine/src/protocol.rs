// crates/sync-engine/src/protocol.rs
//! Reconciliation protocol between a client and the remote authority

use crate::error::RemoteResult;
use crate::types::{Action, RecordId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hash of one record as held by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: RecordId,
    pub hash: String,
}

/// Hash summary of the client's replica
///
/// `Local` entries are records whose create is still pending; the remote
/// cannot know them and skips them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub dataset_hash: String,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Hash the client holds for a remote uid
    pub fn hash_for(&self, uid: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.id.is_remote() && entry.id.as_str() == uid)
            .map(|entry| entry.hash.as_str())
    }
}

/// A local change as sent to the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Hash of the pending entry; echoed back in the ack
    pub hash: String,
    pub action: Action,
    /// Remote uid; `None` for creates
    pub uid: Option<String>,
    /// Hash the remote must hold for the change to apply
    pub pre_hash: Option<String>,
    pub post: Option<Value>,
    pub post_hash: Option<String>,
}

/// One reconciliation exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub dataset_id: String,
    pub manifest: Manifest,
    pub pending: Vec<PendingChange>,
}

/// A change the client has not seen yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDelta {
    pub action: Action,
    pub uid: String,
    /// Content hash after the change; `None` for deletes
    pub hash: Option<String>,
    /// Payload after the change; `None` for deletes
    pub data: Option<Value>,
}

/// Confirmation that a pending change was applied remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Hash of the acknowledged pending entry
    pub hash: String,
    /// Uid of the affected record; freshly assigned for creates
    pub uid: String,
    pub action: Action,
}

/// What the remote sends back
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub deltas: Vec<RecordDelta>,
    pub acks: Vec<Ack>,
}

impl ReconcileResponse {
    /// Response carrying nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if the response neither acknowledges nor changes anything
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.acks.is_empty()
    }
}

/// Options accepted when creating a dataset on the remote
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetOptions {
    /// Records the dataset starts with
    #[serde(default)]
    pub seed: Vec<Value>,
}

/// The remote authority a dataset reconciles against
#[async_trait]
pub trait Remote: Send + Sync {
    /// Sends the manifest and pending changes, returns deltas and acks
    async fn reconcile(&self, request: ReconcileRequest) -> RemoteResult<ReconcileResponse>;

    /// Creates a dataset and returns its id
    async fn create_dataset(&self, name: &str, options: DatasetOptions) -> RemoteResult<String>;

    /// Removes every record of a dataset
    async fn reset_dataset(&self, dataset_id: &str) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_hash_for_ignores_local_entries() {
        let manifest = Manifest {
            dataset_hash: String::new(),
            entries: vec![
                ManifestEntry {
                    id: RecordId::Local("same".into()),
                    hash: "h-local".into(),
                },
                ManifestEntry {
                    id: RecordId::Remote("same".into()),
                    hash: "h-remote".into(),
                },
            ],
        };

        assert_eq!(manifest.hash_for("same"), Some("h-remote"));
        assert_eq!(manifest.hash_for("missing"), None);
    }

    #[test]
    fn test_response_serialization() {
        let response = ReconcileResponse {
            deltas: vec![RecordDelta {
                action: Action::Delete,
                uid: "u1".into(),
                hash: None,
                data: None,
            }],
            acks: vec![Ack {
                hash: "p1".into(),
                uid: "u2".into(),
                action: Action::Create,
            }],
        };

        let json = serde_json::to_string(&response).unwrap();
        let decoded: ReconcileResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, response);
        assert!(json.contains("\"action\":\"delete\""));
    }

    #[test]
    fn test_empty_response() {
        assert!(ReconcileResponse::empty().is_empty());
    }
}
