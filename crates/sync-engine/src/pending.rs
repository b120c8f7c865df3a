// crates/sync-engine/src/pending.rs
//! Outbound queue of local mutations awaiting acknowledgement
//!
//! Entries are kept in enqueue order. A new mutation folds into the newest
//! entry for the same record while that entry has not been sent yet; once it
//! is in flight, the new mutation queues behind it as a delayed entry so the
//! remote always sees a record's changes in order.

use crate::hash_index::pending_hash;
use crate::protocol::PendingChange;
use crate::types::{Action, PendingEntry, RecordId};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

/// An update or delete to enqueue
#[derive(Debug, Clone)]
pub struct Mutation {
    pub action: Action,
    pub uid: RecordId,
    pub pre: Option<Value>,
    pub pre_hash: Option<String>,
    pub post: Option<Value>,
    pub post_hash: Option<String>,
}

/// How an enqueued mutation ended up in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Appended as a new entry
    Added(String),
    /// Folded into an unsent entry for the same record
    Merged(String),
    /// Cancelled an unsent create; nothing about the record remains queued
    Cancelled,
}

impl Enqueued {
    /// Hash of the entry now representing the mutation
    pub fn hash(&self) -> Option<&str> {
        match self {
            Enqueued::Added(hash) | Enqueued::Merged(hash) => Some(hash),
            Enqueued::Cancelled => None,
        }
    }
}

/// Ordered set of pending entries for one dataset
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    entries: Vec<PendingEntry>,
    next_seq: u64,
}

impl PendingQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a queue from saved entries
    pub fn from_entries(mut entries: Vec<PendingEntry>) -> Self {
        entries.sort_by_key(|entry| entry.seq);
        let next_seq = entries.last().map(|entry| entry.seq + 1).unwrap_or(0);
        Self { entries, next_seq }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Enqueues a create and returns its hash, which is also the record's
    /// temporary identifier
    pub fn enqueue_create(&mut self, post: Value, post_hash: String) -> String {
        let seq = self.take_seq();
        let timestamp = Utc::now();
        let hash = pending_hash(
            Action::Create,
            None,
            None,
            Some(&post_hash),
            &timestamp,
            seq,
        );

        self.entries.push(PendingEntry {
            hash: hash.clone(),
            action: Action::Create,
            uid: RecordId::Local(hash.clone()),
            pre: None,
            pre_hash: None,
            post: Some(post),
            post_hash: Some(post_hash),
            timestamp,
            seq,
            in_flight: false,
            crashed: false,
            attempt_count: 0,
            failed_count: 0,
            delayed: false,
            waiting_for: None,
        });
        hash
    }

    /// Enqueues an update or delete, merging with unsent work where possible
    pub fn enqueue(&mut self, mutation: Mutation) -> Enqueued {
        let seq = self.take_seq();
        let timestamp = Utc::now();

        let newest = self
            .entries
            .iter()
            .rposition(|entry| entry.uid == mutation.uid);

        if let Some(pos) = newest {
            if !self.entries[pos].in_flight {
                if let Some(outcome) = self.merge_into(pos, &mutation, seq, timestamp) {
                    return outcome;
                }
            }
        }

        let waiting_for = newest
            .filter(|&pos| self.entries[pos].in_flight)
            .map(|pos| self.entries[pos].hash.clone());

        let hash = pending_hash(
            mutation.action,
            Some(mutation.uid.as_str()),
            mutation.pre_hash.as_deref(),
            mutation.post_hash.as_deref(),
            &timestamp,
            seq,
        );

        self.entries.push(PendingEntry {
            hash: hash.clone(),
            action: mutation.action,
            uid: mutation.uid,
            pre: mutation.pre,
            pre_hash: mutation.pre_hash,
            post: mutation.post,
            post_hash: mutation.post_hash,
            timestamp,
            seq,
            in_flight: false,
            crashed: false,
            attempt_count: 0,
            failed_count: 0,
            delayed: waiting_for.is_some(),
            waiting_for,
        });
        Enqueued::Added(hash)
    }

    fn merge_into(
        &mut self,
        pos: usize,
        mutation: &Mutation,
        seq: u64,
        timestamp: chrono::DateTime<Utc>,
    ) -> Option<Enqueued> {
        let existing = &mut self.entries[pos];

        match (existing.action, mutation.action) {
            (Action::Create, Action::Update) => {
                existing.post = mutation.post.clone();
                existing.post_hash = mutation.post_hash.clone();
                existing.timestamp = timestamp;
                Some(Enqueued::Merged(existing.hash.clone()))
            }
            (Action::Create, Action::Delete) => {
                self.entries.remove(pos);
                Some(Enqueued::Cancelled)
            }
            (Action::Update, Action::Update) | (Action::Update, Action::Delete) => {
                existing.action = mutation.action;
                existing.post = mutation.post.clone();
                existing.post_hash = mutation.post_hash.clone();
                existing.timestamp = timestamp;
                existing.hash = pending_hash(
                    existing.action,
                    Some(existing.uid.as_str()),
                    existing.pre_hash.as_deref(),
                    existing.post_hash.as_deref(),
                    &timestamp,
                    seq,
                );
                Some(Enqueued::Merged(existing.hash.clone()))
            }
            _ => None,
        }
    }

    /// Marks every sendable entry in flight and returns what to send
    pub fn begin_cycle(&mut self) -> Vec<PendingChange> {
        self.entries
            .iter_mut()
            .filter(|entry| entry.is_sendable())
            .map(|entry| {
                entry.in_flight = true;
                entry.attempt_count += 1;
                PendingChange {
                    hash: entry.hash.clone(),
                    action: entry.action,
                    uid: entry
                        .uid
                        .is_remote()
                        .then(|| entry.uid.as_str().to_string()),
                    pre_hash: entry.pre_hash.clone(),
                    post: entry.post.clone(),
                    post_hash: entry.post_hash.clone(),
                }
            })
            .collect()
    }

    /// Counts a failed cycle against every in-flight entry
    ///
    /// Returns the hashes of entries that became crashed on this failure.
    pub fn record_failure(&mut self, crashed_count_wait: u32) -> Vec<String> {
        let mut newly_crashed = Vec::new();
        for entry in self.entries.iter_mut().filter(|entry| entry.in_flight) {
            entry.failed_count += 1;
            if entry.failed_count >= crashed_count_wait && !entry.crashed {
                entry.crashed = true;
                newly_crashed.push(entry.hash.clone());
            }
        }
        newly_crashed
    }

    /// Resets the consecutive failure count of entries still in flight
    pub fn record_success(&mut self) {
        for entry in self.entries.iter_mut().filter(|entry| entry.in_flight) {
            entry.failed_count = 0;
        }
    }

    /// Removes an acknowledged entry
    pub fn acknowledge(&mut self, hash: &str) -> Option<PendingEntry> {
        self.remove(hash)
    }

    /// Removes an entry and releases anything queued behind it
    pub fn remove(&mut self, hash: &str) -> Option<PendingEntry> {
        let pos = self.entries.iter().position(|entry| entry.hash == hash)?;
        let removed = self.entries.remove(pos);

        for entry in self.entries.iter_mut() {
            if entry.waiting_for.as_deref() == Some(hash) {
                entry.waiting_for = None;
                entry.delayed = false;
            }
        }
        Some(removed)
    }

    /// Points every entry for `from` at the record's new identity
    pub fn rewrite_uid(&mut self, from: &RecordId, to: &RecordId) {
        for entry in self.entries.iter_mut().filter(|entry| &entry.uid == from) {
            entry.uid = to.clone();
        }
    }

    /// Entries touching the record with identifier `uid`, oldest first
    pub fn for_uid(&self, uid: &str) -> Vec<PendingEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.uid.as_str() == uid)
            .cloned()
            .collect()
    }

    /// Looks an entry up by hash
    pub fn get(&self, hash: &str) -> Option<&PendingEntry> {
        self.entries.iter().find(|entry| entry.hash == hash)
    }

    /// Entries in enqueue order
    pub fn entries(&self) -> &[PendingEntry] {
        &self.entries
    }

    /// Snapshot keyed by hash
    pub fn snapshot(&self) -> BTreeMap<String, PendingEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.hash.clone(), entry.clone()))
            .collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
