// crates/sync-engine/src/collision.rs
//! Collision detection and storage
//!
//! A local change collides with a remote delta when the pre-image the change
//! was based on is not what the remote now holds for the same record.

use crate::protocol::RecordDelta;
use crate::types::{Action, Collision, PendingEntry};
use chrono::Utc;
use std::collections::BTreeMap;

/// Returns true if `entry` cannot be applied on top of the remote state
/// described by `delta`
///
/// A remote delete counts as an absent pre-image.
pub fn detect_collision(entry: &PendingEntry, delta: &RecordDelta) -> bool {
    if converged(entry, delta) {
        return false;
    }
    let remote_hash = match delta.action {
        Action::Delete => None,
        _ => delta.hash.as_deref(),
    };
    entry.pre_hash.as_deref() != remote_hash
}

/// Both sides deleted the record, so the local delete has nothing left to do
pub fn converged(entry: &PendingEntry, delta: &RecordDelta) -> bool {
    entry.action == Action::Delete && delta.action == Action::Delete
}

/// Builds the collision record for a pending entry and the delta it lost to
pub fn collision_from(entry: &PendingEntry, delta: &RecordDelta) -> Collision {
    let (remote, remote_hash) = match delta.action {
        Action::Delete => (None, None),
        _ => (delta.data.clone(), delta.hash.clone()),
    };

    Collision {
        hash: entry.hash.clone(),
        uid: delta.uid.clone(),
        action: entry.action,
        local: entry.post.clone(),
        local_hash: entry.post_hash.clone(),
        expected_hash: entry.pre_hash.clone(),
        remote,
        remote_hash,
        detected_at: Utc::now(),
    }
}

/// Collisions for one dataset, keyed by the hash of the local change
#[derive(Debug, Clone, Default)]
pub struct CollisionStore {
    collisions: BTreeMap<String, Collision>,
}

impl CollisionStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from saved collisions
    pub fn from_collisions(collisions: impl IntoIterator<Item = Collision>) -> Self {
        Self {
            collisions: collisions
                .into_iter()
                .map(|collision| (collision.hash.clone(), collision))
                .collect(),
        }
    }

    /// Records a collision, replacing any earlier one for the same hash
    pub fn insert(&mut self, collision: Collision) {
        self.collisions.insert(collision.hash.clone(), collision);
    }

    /// Resolves a collision by discarding it
    pub fn remove(&mut self, hash: &str) -> Option<Collision> {
        self.collisions.remove(hash)
    }

    /// Looks a collision up by hash
    pub fn get(&self, hash: &str) -> Option<&Collision> {
        self.collisions.get(hash)
    }

    /// Snapshot of every unresolved collision
    pub fn list(&self) -> BTreeMap<String, Collision> {
        self.collisions.clone()
    }

    /// Iterates over collisions in hash order
    pub fn iter(&self) -> impl Iterator<Item = &Collision> {
        self.collisions.values()
    }

    /// Number of unresolved collisions
    pub fn len(&self) -> usize {
        self.collisions.len()
    }

    /// Returns true if there are no collisions
    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty()
    }

    /// Drops every collision
    pub fn clear(&mut self) {
        self.collisions.clear();
    }
}
