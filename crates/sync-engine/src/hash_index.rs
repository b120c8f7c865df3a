// crates/sync-engine/src/hash_index.rs
//! Content hashing for records, datasets and pending entries
//!
//! Hashes are lowercase hex MD5 digests. Record payloads are hashed over a
//! compact JSON rendering with object keys sorted at every level, so two
//! deep-equal values always hash the same.

use crate::types::Action;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Hash of a record payload
pub fn content_hash(data: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(data, &mut canonical);
    format!("{:x}", md5::compute(canonical))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hash identifying one pending mutation
///
/// Includes the enqueue sequence so two identical edits made in the same
/// instant still get distinct keys. `uid` is `None` for creates, whose
/// temporary identifier is this very hash.
pub fn pending_hash(
    action: Action,
    uid: Option<&str>,
    pre_hash: Option<&str>,
    post_hash: Option<&str>,
    timestamp: &DateTime<Utc>,
    seq: u64,
) -> String {
    let material = serde_json::json!({
        "action": action,
        "uid": uid,
        "pre_hash": pre_hash,
        "post_hash": post_hash,
        "timestamp": timestamp.to_rfc3339(),
        "seq": seq,
    });
    content_hash(&material)
}

/// Cache of record id to content hash for one dataset
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    hashes: BTreeMap<String, String>,
}

impl HashIndex {
    /// Creates an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `data`, caches it under `id` and returns the hash
    pub fn insert(&mut self, id: &str, data: &Value) -> String {
        let hash = content_hash(data);
        self.hashes.insert(id.to_string(), hash.clone());
        hash
    }

    /// Returns the cached hash for `id`
    pub fn get(&self, id: &str) -> Option<&str> {
        self.hashes.get(id).map(String::as_str)
    }

    /// Drops the cached hash for `id`
    pub fn remove(&mut self, id: &str) -> Option<String> {
        self.hashes.remove(id)
    }

    /// Moves a cached hash to a new id
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(hash) = self.hashes.remove(from) {
            self.hashes.insert(to.to_string(), hash);
        }
    }

    /// Summary hash over every cached record hash
    ///
    /// Independent of insertion order and of record ids.
    pub fn dataset_hash(&self) -> String {
        let mut hashes: Vec<&str> = self.hashes.values().map(String::as_str).collect();
        hashes.sort_unstable();
        format!("{:x}", md5::compute(hashes.concat()))
    }

    /// Number of cached hashes
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Drops every cached hash
    pub fn clear(&mut self) {
        self.hashes.clear();
    }
}
