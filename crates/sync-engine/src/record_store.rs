// crates/sync-engine/src/record_store.rs
//! Local replica of one dataset's records

use crate::hash_index::HashIndex;
use crate::protocol::{Manifest, ManifestEntry};
use crate::types::{Record, RecordId};
use serde_json::Value;
use std::collections::BTreeMap;

/// Records keyed by their current identifier string
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: BTreeMap<String, Record>,
    index: HashIndex,
}

impl RecordStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from previously saved records
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.put(record.id, record.data);
        }
        store
    }

    /// Inserts or replaces a record and returns its content hash
    pub fn put(&mut self, id: RecordId, data: Value) -> String {
        let key = id.as_str().to_string();
        let hash = self.index.insert(&key, &data);
        self.records.insert(
            key,
            Record {
                id,
                data,
                hash: hash.clone(),
            },
        );
        hash
    }

    /// Looks a record up by identifier string
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Returns true if the record exists
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Removes a record
    pub fn remove(&mut self, id: &str) -> Option<Record> {
        self.index.remove(id);
        self.records.remove(id)
    }

    /// Moves a record to a new identity, keeping its payload
    ///
    /// Returns false if no record exists under `from`.
    pub fn rekey(&mut self, from: &str, to: RecordId) -> bool {
        match self.records.remove(from) {
            Some(mut record) => {
                let key = to.as_str().to_string();
                self.index.rename(from, &key);
                record.id = to;
                self.records.insert(key, record);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every record
    pub fn list(&self) -> BTreeMap<String, Record> {
        self.records.clone()
    }

    /// Iterates over records in identifier order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Hash summary of the replica sent at the start of a cycle
    pub fn manifest(&self) -> Manifest {
        Manifest {
            dataset_hash: self.index.dataset_hash(),
            entries: self
                .records
                .values()
                .map(|record| ManifestEntry {
                    id: record.id.clone(),
                    hash: record.hash.clone(),
                })
                .collect(),
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes every record
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}
