// crates/sync-engine/src/dataset.rs
//! Per-dataset replica state
//!
//! [`DatasetState`] bundles the record store, pending queue and collision
//! store of one dataset and implements every state transition on them: local
//! mutations and the application of a remote response. It performs no I/O;
//! persistence goes through [`DatasetSnapshot`].

use crate::collision::{collision_from, converged, detect_collision, CollisionStore};
use crate::error::{SyncError, SyncResult};
use crate::hash_index::content_hash;
use crate::notify::{EventCode, EventMessage, SyncEvent};
use crate::pending::{Mutation, PendingQueue};
use crate::protocol::{Ack, ReconcileResponse, RecordDelta};
use crate::record_store::RecordStore;
use crate::types::{
    Action, ChangeReceipt, Collision, DatasetConfig, DatasetStatus, PendingEntry, Record, RecordId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const STORAGE_PREFIX: &str = "dataset:";

/// Key a dataset's snapshot is stored under
pub fn storage_key(dataset_id: &str) -> String {
    format!("{}{}", STORAGE_PREFIX, dataset_id)
}

/// Persisted form of a dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub pending: Vec<PendingEntry>,
    #[serde(default)]
    pub collisions: Vec<Collision>,
    /// Temporary create hash to assigned uid
    #[serde(default)]
    pub uid_map: BTreeMap<String, String>,
}

impl DatasetSnapshot {
    /// Encodes the snapshot for the key-value store
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a stored snapshot
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Everything the engine knows about one dataset
#[derive(Debug, Clone)]
pub(crate) struct DatasetState {
    pub records: RecordStore,
    pub pending: PendingQueue,
    pub collisions: CollisionStore,
    pub uid_map: BTreeMap<String, String>,
    pub config: DatasetConfig,
    pub status: DatasetStatus,
    /// Set by `clear_cache`; an in-flight cycle discards its result
    pub cleared: bool,
}

impl DatasetState {
    pub fn new(config: DatasetConfig) -> Self {
        Self::from_snapshot(DatasetSnapshot::default(), config)
    }

    pub fn from_snapshot(snapshot: DatasetSnapshot, config: DatasetConfig) -> Self {
        let status = if config.auto_sync {
            DatasetStatus::Active
        } else {
            DatasetStatus::Stopped
        };

        Self {
            records: RecordStore::from_records(snapshot.records),
            pending: PendingQueue::from_entries(snapshot.pending),
            collisions: CollisionStore::from_collisions(snapshot.collisions),
            uid_map: snapshot.uid_map,
            config,
            status,
            cleared: false,
        }
    }

    pub fn snapshot(&self) -> DatasetSnapshot {
        DatasetSnapshot {
            records: self.records.iter().cloned().collect(),
            pending: self.pending.entries().to_vec(),
            collisions: self.collisions.iter().cloned().collect(),
            uid_map: self.uid_map.clone(),
        }
    }

    /// Key of the record `uid` refers to, accepting a temporary create hash
    /// after the record has been re-keyed
    pub fn resolve(&self, uid: &str) -> Option<String> {
        if self.records.contains(uid) {
            return Some(uid.to_string());
        }
        self.uid_map
            .get(uid)
            .filter(|mapped| self.records.contains(mapped))
            .cloned()
    }

    pub fn read(&self, uid: &str) -> SyncResult<Record> {
        self.resolve(uid)
            .and_then(|key| self.records.get(&key).cloned())
            .ok_or(SyncError::UnknownUid)
    }

    pub fn create(&mut self, data: Value) -> ChangeReceipt {
        let post_hash = content_hash(&data);
        let hash = self.pending.enqueue_create(data.clone(), post_hash);
        let uid = RecordId::Local(hash.clone());
        self.records.put(uid.clone(), data.clone());

        ChangeReceipt {
            uid,
            hash,
            action: Action::Create,
            post: Some(data),
        }
    }

    pub fn update(&mut self, uid: &str, data: Value) -> SyncResult<ChangeReceipt> {
        let previous = self.read(uid)?;
        let post_hash = self.records.put(previous.id.clone(), data.clone());

        let outcome = self.pending.enqueue(Mutation {
            action: Action::Update,
            uid: previous.id.clone(),
            pre: Some(previous.data),
            pre_hash: Some(previous.hash),
            post: Some(data.clone()),
            post_hash: Some(post_hash.clone()),
        });

        Ok(ChangeReceipt {
            uid: previous.id,
            hash: outcome.hash().map(str::to_string).unwrap_or(post_hash),
            action: Action::Update,
            post: Some(data),
        })
    }

    pub fn delete(&mut self, uid: &str) -> SyncResult<ChangeReceipt> {
        let key = self.resolve(uid).ok_or(SyncError::UnknownUid)?;
        let removed = self.records.remove(&key).ok_or(SyncError::UnknownUid)?;

        let outcome = self.pending.enqueue(Mutation {
            action: Action::Delete,
            uid: removed.id.clone(),
            pre: Some(removed.data),
            pre_hash: Some(removed.hash.clone()),
            post: None,
            post_hash: None,
        });

        Ok(ChangeReceipt {
            uid: removed.id,
            hash: outcome.hash().map(str::to_string).unwrap_or(removed.hash),
            action: Action::Delete,
            post: None,
        })
    }

    /// Drops every record, pending entry and collision
    pub fn clear(&mut self) {
        self.records.clear();
        self.pending.clear();
        self.collisions.clear();
        self.uid_map.clear();
        self.cleared = true;
    }

    /// Applies a successful reconciliation and returns the events it produced
    ///
    /// Acks are settled before deltas so a freshly assigned uid is already
    /// in place when deltas are matched against pending work.
    pub fn apply_response(&mut self, dataset_id: &str, response: ReconcileResponse) -> Vec<SyncEvent> {
        self.pending.record_success();

        let mut events = Vec::new();
        for ack in response.acks {
            if let Some(event) = self.apply_ack(dataset_id, ack) {
                events.push(event);
            }
        }
        for delta in response.deltas {
            self.apply_delta(dataset_id, delta, &mut events);
        }
        events
    }

    fn apply_ack(&mut self, dataset_id: &str, ack: Ack) -> Option<SyncEvent> {
        let Some(entry) = self.pending.acknowledge(&ack.hash) else {
            log::debug!("[{}] Ignoring ack for unknown change {}", dataset_id, ack.hash);
            return None;
        };

        if entry.action == Action::Create {
            let local = RecordId::Local(entry.hash.clone());
            let remote = RecordId::Remote(ack.uid.clone());
            self.records.rekey(local.as_str(), remote.clone());
            self.pending.rewrite_uid(&local, &remote);
            self.uid_map.insert(entry.hash.clone(), ack.uid.clone());
        }

        Some(
            SyncEvent::new(dataset_id, EventCode::RemoteUpdateApplied)
                .with_uid(ack.uid.clone())
                .with_message(EventMessage::applied(entry.action, entry.hash, ack.uid)),
        )
    }

    fn apply_delta(&mut self, dataset_id: &str, delta: RecordDelta, events: &mut Vec<SyncEvent>) {
        let mut overlapping = self.pending.for_uid(&delta.uid);
        overlapping.retain(|entry| {
            if !converged(entry, &delta) {
                return true;
            }
            log::debug!(
                "[{}] {} already deleted remotely, dropping local delete {}",
                dataset_id,
                delta.uid,
                entry.hash
            );
            self.pending.remove(&entry.hash);
            false
        });

        if !overlapping.is_empty() {
            let colliding: Vec<PendingEntry> = overlapping
                .into_iter()
                .filter(|entry| detect_collision(entry, &delta))
                .collect();

            if colliding.is_empty() {
                log::debug!(
                    "[{}] Keeping local change to {} over remote {}",
                    dataset_id,
                    delta.uid,
                    delta.action
                );
                return;
            }

            for entry in colliding {
                log::warn!(
                    "[{}] Collision on {}: local {} expected {:?}, remote holds {:?}",
                    dataset_id,
                    delta.uid,
                    entry.hash,
                    entry.pre_hash,
                    delta.hash
                );
                self.collisions.insert(collision_from(&entry, &delta));
                self.pending.remove(&entry.hash);
                events.push(
                    SyncEvent::new(dataset_id, EventCode::CollisionDetected)
                        .with_uid(delta.uid.clone())
                        .with_message(EventMessage::Collision {
                            uid: delta.uid.clone(),
                            hash: entry.hash,
                        }),
                );
            }
            return;
        }

        match (delta.action, delta.data) {
            (Action::Delete, _) => {
                if self.records.remove(&delta.uid).is_none() {
                    return;
                }
            }
            (action, Some(data)) => {
                self.records.put(RecordId::Remote(delta.uid.clone()), data);
                log::trace!("[{}] Applied remote {} of {}", dataset_id, action, delta.uid);
            }
            (action, None) => {
                log::warn!(
                    "[{}] Remote {} of {} carried no data",
                    dataset_id,
                    action,
                    delta.uid
                );
                return;
            }
        }

        let hash = delta.hash.unwrap_or_default();
        events.push(
            SyncEvent::new(dataset_id, EventCode::RemoteUpdateApplied)
                .with_uid(delta.uid.clone())
                .with_message(EventMessage::applied(delta.action, hash, delta.uid.clone())),
        );
        events.push(
            SyncEvent::new(dataset_id, EventCode::RecordDeltaReceived)
                .with_uid(delta.uid)
                .with_text(delta.action.as_str()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> DatasetState {
        DatasetState::new(DatasetConfig::default())
    }

    fn ack_all(state: &mut DatasetState) -> Vec<Ack> {
        state
            .pending
            .begin_cycle()
            .into_iter()
            .map(|change| Ack {
                uid: change.uid.unwrap_or_else(|| format!("uid-{}", &change.hash[..8])),
                hash: change.hash,
                action: change.action,
            })
            .collect()
    }

    #[test]
    fn test_create_is_readable_before_sync() {
        let mut state = state();
        let receipt = state.create(json!({"test": "text"}));

        assert_eq!(receipt.uid, RecordId::Local(receipt.hash.clone()));
        let record = state.read(receipt.uid.as_str()).unwrap();
        assert_eq!(record.data, json!({"test": "text"}));
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_unknown_uid() {
        let mut state = state();
        assert!(matches!(state.read("bogus_uid"), Err(SyncError::UnknownUid)));
        assert!(matches!(state.update("bogus_uid", json!(1)), Err(SyncError::UnknownUid)));
        assert!(matches!(state.delete("bogus_uid"), Err(SyncError::UnknownUid)));
    }

    #[test]
    fn test_create_ack_rekeys_record() {
        let mut state = state();
        let receipt = state.create(json!({"n": 1}));

        let acks = ack_all(&mut state);
        let uid = acks[0].uid.clone();
        let events = state.apply_response("X", ReconcileResponse { deltas: vec![], acks });

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, EventCode::RemoteUpdateApplied);
        assert_eq!(events[0].uid.as_deref(), Some(uid.as_str()));
        assert_eq!(events[0].message.action(), Some(Action::Create));

        assert!(state.pending.is_empty());
        assert_eq!(state.uid_map.get(&receipt.hash), Some(&uid));
        assert_eq!(state.read(&uid).unwrap().id, RecordId::Remote(uid.clone()));
        // The temporary hash keeps resolving
        assert_eq!(state.read(&receipt.hash).unwrap().data, json!({"n": 1}));
    }

    #[test]
    fn test_create_then_delete_leaves_nothing() {
        let mut state = state();
        let receipt = state.create(json!(1));
        state.delete(receipt.uid.as_str()).unwrap();

        assert!(state.records.is_empty());
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_remote_delta_applied() {
        let mut state = state();
        let data = json!({"from": "elsewhere"});
        let events = state.apply_response(
            "X",
            ReconcileResponse {
                deltas: vec![RecordDelta {
                    action: Action::Create,
                    uid: "u9".into(),
                    hash: Some(content_hash(&data)),
                    data: Some(data.clone()),
                }],
                acks: vec![],
            },
        );

        let codes: Vec<EventCode> = events.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![EventCode::RemoteUpdateApplied, EventCode::RecordDeltaReceived]
        );
        assert_eq!(events[1].message.as_text(), Some("create"));
        assert_eq!(state.read("u9").unwrap().data, data);
    }

    #[test]
    fn test_divergent_delta_records_collision() {
        let mut state = state();
        state.records.put(RecordId::Remote("u1".into()), json!("base"));
        let receipt = state.update("u1", json!("mine")).unwrap();
        state.pending.begin_cycle();

        let theirs = json!("theirs");
        let events = state.apply_response(
            "X",
            ReconcileResponse {
                deltas: vec![RecordDelta {
                    action: Action::Update,
                    uid: "u1".into(),
                    hash: Some(content_hash(&theirs)),
                    data: Some(theirs),
                }],
                acks: vec![],
            },
        );

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].message,
            EventMessage::Collision {
                uid: "u1".into(),
                hash: receipt.hash.clone()
            }
        );
        assert!(state.pending.is_empty());
        assert_eq!(state.collisions.len(), 1);
        assert!(state.collisions.get(&receipt.hash).is_some());
        // Local value is not overwritten by the losing delta
        assert_eq!(state.read("u1").unwrap().data, json!("mine"));
    }

    #[test]
    fn test_delta_matching_pre_image_keeps_local_change() {
        let mut state = state();
        let base = json!("base");
        state.records.put(RecordId::Remote("u1".into()), base.clone());
        state.update("u1", json!("mine")).unwrap();

        let events = state.apply_response(
            "X",
            ReconcileResponse {
                deltas: vec![RecordDelta {
                    action: Action::Update,
                    uid: "u1".into(),
                    hash: Some(content_hash(&base)),
                    data: Some(base),
                }],
                acks: vec![],
            },
        );

        assert!(events.is_empty());
        assert_eq!(state.pending.len(), 1);
        assert!(state.collisions.is_empty());
        assert_eq!(state.read("u1").unwrap().data, json!("mine"));
    }

    #[test]
    fn test_delete_on_both_sides_is_not_a_collision() {
        let mut state = state();
        state.records.put(RecordId::Remote("u1".into()), json!("base"));
        let update = state.update("u1", json!("mine")).unwrap();
        state.pending.begin_cycle();
        let delete = state.delete("u1").unwrap();
        assert!(state.pending.get(&delete.hash).unwrap().delayed);

        let events = state.apply_response(
            "X",
            ReconcileResponse {
                deltas: vec![RecordDelta {
                    action: Action::Delete,
                    uid: "u1".into(),
                    hash: None,
                    data: None,
                }],
                acks: vec![],
            },
        );

        // The in-flight update still lost; the delete agreed with the remote
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, EventCode::CollisionDetected);
        assert!(state.collisions.get(&update.hash).is_some());
        assert!(state.collisions.get(&delete.hash).is_none());
        assert!(state.pending.is_empty());
        assert!(state.read("u1").is_err());
    }

    #[test]
    fn test_lone_delete_against_remote_delete_converges() {
        let mut state = state();
        state.records.put(RecordId::Remote("u1".into()), json!("base"));
        state.delete("u1").unwrap();

        let events = state.apply_response(
            "X",
            ReconcileResponse {
                deltas: vec![RecordDelta {
                    action: Action::Delete,
                    uid: "u1".into(),
                    hash: None,
                    data: None,
                }],
                acks: vec![],
            },
        );

        assert!(events.is_empty());
        assert!(state.pending.is_empty());
        assert!(state.collisions.is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_pending_work() {
        let mut state = state();
        let receipt = state.create(json!({"k": "v"}));
        state.pending.begin_cycle();

        let bytes = state.snapshot().to_bytes().unwrap();
        let restored = DatasetState::from_snapshot(
            DatasetSnapshot::from_bytes(&bytes).unwrap(),
            DatasetConfig::default(),
        );

        let entry = restored.pending.get(&receipt.hash).unwrap();
        assert!(entry.in_flight);
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(restored.read(&receipt.hash).unwrap().data, json!({"k": "v"}));
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(storage_key("tasks"), "dataset:tasks");
    }
}
