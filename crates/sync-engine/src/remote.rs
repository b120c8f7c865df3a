// crates/sync-engine/src/remote.rs
//! In-memory remote authority
//!
//! [`MemoryRemote`] keeps the authoritative copy of every dataset in process
//! memory. Besides answering reconciliations it lets tests and tooling act as
//! "another client" (`create_record`, `update_record`, `delete_record`) and
//! inject faults through [`ServerStatus`].

use crate::error::{RemoteError, RemoteResult};
use crate::hash_index::content_hash;
use crate::protocol::{
    Ack, DatasetOptions, PendingChange, ReconcileRequest, ReconcileResponse, RecordDelta, Remote,
};
use crate::types::Action;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Fault injection switches
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStatus {
    /// Fail every reconciliation with `crash_status`
    pub crashed: bool,
    /// Status code reported while crashed
    pub crash_status: u16,
    /// Answer every reconciliation with this response, leaving state untouched
    pub forced_response: Option<ReconcileResponse>,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self {
            crashed: false,
            crash_status: 500,
            forced_response: None,
        }
    }
}

impl ServerStatus {
    /// A healthy server
    pub fn healthy() -> Self {
        Self::default()
    }

    /// A server failing with `status`
    pub fn crashed(status: u16) -> Self {
        Self {
            crashed: true,
            crash_status: status,
            forced_response: None,
        }
    }

    /// A server returning `response` for every request
    pub fn forced(response: ReconcileResponse) -> Self {
        Self {
            forced_response: Some(response),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    data: Value,
    hash: String,
}

#[derive(Debug, Default)]
struct RemoteDataset {
    records: BTreeMap<String, StoredRecord>,
    /// Pending hashes already applied, with the ack that was sent for them
    applied: HashMap<String, Ack>,
}

impl RemoteDataset {
    fn insert(&mut self, uid: String, data: Value) -> String {
        let hash = content_hash(&data);
        self.records.insert(
            uid,
            StoredRecord {
                data,
                hash: hash.clone(),
            },
        );
        hash
    }

    fn current_hash(&self, uid: &str) -> Option<&str> {
        self.records.get(uid).map(|record| record.hash.as_str())
    }

    /// Applies one pending change; `None` leaves it unacknowledged
    fn apply(&mut self, change: &PendingChange) -> Option<Ack> {
        if let Some(ack) = self.applied.get(&change.hash) {
            return Some(ack.clone());
        }

        let ack = match change.action {
            Action::Create => {
                let data = change.post.clone()?;
                let uid = Uuid::new_v4().simple().to_string();
                self.insert(uid.clone(), data);
                Ack {
                    hash: change.hash.clone(),
                    uid,
                    action: Action::Create,
                }
            }
            Action::Update | Action::Delete => {
                let uid = change.uid.clone()?;
                let current = self.current_hash(&uid).map(str::to_string);

                if current == change.pre_hash {
                    match (&change.action, change.post.clone()) {
                        (Action::Update, Some(data)) => {
                            self.insert(uid.clone(), data);
                        }
                        (Action::Update, None) => return None,
                        _ => {
                            self.records.remove(&uid);
                        }
                    }
                } else if current != change.post_hash {
                    log::debug!(
                        "Rejecting {} of {}: expected {:?}, holding {:?}",
                        change.action,
                        uid,
                        change.pre_hash,
                        current
                    );
                    return None;
                }

                Ack {
                    hash: change.hash.clone(),
                    uid,
                    action: change.action,
                }
            }
        };

        self.applied.insert(change.hash.clone(), ack.clone());
        Some(ack)
    }

    fn reconcile(&mut self, request: &ReconcileRequest) -> ReconcileResponse {
        let acks: Vec<Ack> = request
            .pending
            .iter()
            .filter_map(|change| self.apply(change))
            .collect();

        let acked: HashSet<&str> = acks.iter().map(|ack| ack.uid.as_str()).collect();
        let mut deltas = Vec::new();

        for (uid, record) in &self.records {
            if acked.contains(uid.as_str()) {
                continue;
            }
            let action = match request.manifest.hash_for(uid) {
                None => Action::Create,
                Some(hash) if hash != record.hash => Action::Update,
                Some(_) => continue,
            };
            deltas.push(RecordDelta {
                action,
                uid: uid.clone(),
                hash: Some(record.hash.clone()),
                data: Some(record.data.clone()),
            });
        }

        for entry in request.manifest.entries.iter().filter(|e| e.id.is_remote()) {
            let uid = entry.id.as_str();
            if !self.records.contains_key(uid) && !acked.contains(uid) {
                deltas.push(RecordDelta {
                    action: Action::Delete,
                    uid: uid.to_string(),
                    hash: None,
                    data: None,
                });
            }
        }

        ReconcileResponse { deltas, acks }
    }
}

/// Authoritative in-memory remote
#[derive(Debug, Default)]
pub struct MemoryRemote {
    datasets: Mutex<HashMap<String, RemoteDataset>>,
    status: Mutex<ServerStatus>,
    latency: Option<Duration>,
}

impl MemoryRemote {
    /// Creates a healthy remote with no datasets
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reconciliation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replaces the fault injection switches
    pub fn set_status(&self, status: ServerStatus) {
        log::debug!("Remote status set to {:?}", status);
        *lock(&self.status) = status;
    }

    /// Current fault injection switches
    pub fn status(&self) -> ServerStatus {
        lock(&self.status).clone()
    }

    /// Creates a record as another client would and returns its uid
    pub fn create_record(&self, dataset_id: &str, data: Value) -> String {
        let uid = Uuid::new_v4().simple().to_string();
        lock(&self.datasets)
            .entry(dataset_id.to_string())
            .or_default()
            .insert(uid.clone(), data);
        uid
    }

    /// Replaces a record as another client would; false if it does not exist
    pub fn update_record(&self, dataset_id: &str, uid: &str, data: Value) -> bool {
        let mut datasets = lock(&self.datasets);
        match datasets.get_mut(dataset_id) {
            Some(dataset) if dataset.records.contains_key(uid) => {
                dataset.insert(uid.to_string(), data);
                true
            }
            _ => false,
        }
    }

    /// Deletes a record as another client would; false if it does not exist
    pub fn delete_record(&self, dataset_id: &str, uid: &str) -> bool {
        lock(&self.datasets)
            .get_mut(dataset_id)
            .and_then(|dataset| dataset.records.remove(uid))
            .is_some()
    }

    /// Authoritative payload of a record
    pub fn record(&self, dataset_id: &str, uid: &str) -> Option<Value> {
        lock(&self.datasets)
            .get(dataset_id)
            .and_then(|dataset| dataset.records.get(uid))
            .map(|record| record.data.clone())
    }

    /// Every record of a dataset, keyed by uid
    pub fn records(&self, dataset_id: &str) -> BTreeMap<String, Value> {
        lock(&self.datasets)
            .get(dataset_id)
            .map(|dataset| {
                dataset
                    .records
                    .iter()
                    .map(|(uid, record)| (uid.clone(), record.data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn reconcile(&self, request: ReconcileRequest) -> RemoteResult<ReconcileResponse> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let status = self.status();
        if let Some(response) = status.forced_response {
            return Ok(response);
        }
        if status.crashed {
            return Err(RemoteError::Status(status.crash_status));
        }

        let mut datasets = lock(&self.datasets);
        let dataset = datasets.entry(request.dataset_id.clone()).or_default();
        let response = dataset.reconcile(&request);

        log::debug!(
            "Reconciled {}: {} acks, {} deltas",
            request.dataset_id,
            response.acks.len(),
            response.deltas.len()
        );
        Ok(response)
    }

    async fn create_dataset(&self, name: &str, options: DatasetOptions) -> RemoteResult<String> {
        let mut datasets = lock(&self.datasets);
        let dataset = datasets.entry(name.to_string()).or_default();
        for data in options.seed {
            dataset.insert(Uuid::new_v4().simple().to_string(), data);
        }
        Ok(name.to_string())
    }

    async fn reset_dataset(&self, dataset_id: &str) -> RemoteResult<()> {
        let mut datasets = lock(&self.datasets);
        let dataset = datasets
            .get_mut(dataset_id)
            .ok_or_else(|| RemoteError::UnknownDataset(dataset_id.to_string()))?;
        dataset.records.clear();
        dataset.applied.clear();
        Ok(())
    }
}
