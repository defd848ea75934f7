//! Process-wide object details cache.
//!
//! One cache is created per session and shared (via `Arc`) by every open
//! document and every subscription. Writers for different contexts may run
//! concurrently, so each mutation is a read-modify-write under the DashMap
//! shard lock for that object id; no update is lost when the same object is
//! referenced from two documents.
//!
//! # Concurrency Model
//!
//! - DashMap entry API for per-id atomic updates
//! - Change broadcasting for cross-document listeners

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::trace;

use tessera_types::{DetailPatch, ObjectDetails, ObjectId};

/// Notifications broadcast when cached details change.
#[derive(Clone, Debug, PartialEq)]
pub enum DetailsChange {
    /// Keys of one object changed (set, amend, or unset).
    Updated { id: ObjectId, keys: Vec<String> },
    /// One object was evicted.
    Removed(ObjectId),
    /// The whole cache was invalidated.
    Cleared,
}

/// Shared object details storage.
pub struct DetailsCache {
    entries: DashMap<ObjectId, ObjectDetails>,
    change_tx: broadcast::Sender<DetailsChange>,
}

impl Default for DetailsCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl DetailsCache {
    /// Create an empty cache whose change channel holds `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(capacity.max(1));
        Self { entries: DashMap::new(), change_tx }
    }

    /// Receive change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DetailsChange> {
        self.change_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Cloned details for an id. Absence means "not yet available".
    pub fn get(&self, id: &str) -> Option<ObjectDetails> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Read through a closure without cloning the whole entry.
    pub fn with<R>(&self, id: &str, f: impl FnOnce(&ObjectDetails) -> R) -> Option<R> {
        self.entries.get(id).map(|e| f(e.value()))
    }

    /// Replace all details of an object. Returns the keys whose value
    /// differs from what was cached (added, changed, or dropped).
    pub fn set(&self, details: ObjectDetails) -> Vec<String> {
        let id = details.id.clone();
        let changed = match self.entries.entry(id.clone()) {
            Entry::Occupied(mut slot) => {
                let old = slot.get();
                let mut changed: Vec<String> = details
                    .values
                    .iter()
                    .filter(|(k, v)| old.get(k) != Some(*v))
                    .map(|(k, _)| k.clone())
                    .collect();
                changed.extend(
                    old.values.keys().filter(|k| !details.values.contains_key(*k)).cloned(),
                );
                slot.insert(details);
                changed
            }
            Entry::Vacant(slot) => {
                let keys = details.values.keys().cloned().collect();
                slot.insert(details);
                keys
            }
        };
        self.publish(id, &changed);
        changed
    }

    /// Merge patches into an object's details, creating the entry if needed.
    /// Returns the keys whose value actually changed.
    pub fn amend(&self, id: &ObjectId, patches: &[DetailPatch]) -> Vec<String> {
        let changed = self
            .entries
            .entry(id.clone())
            .or_insert_with(|| ObjectDetails::new(id.clone()))
            .amend(patches);
        self.publish(id.clone(), &changed);
        changed
    }

    /// Remove keys from an object's details. Returns the keys that were present.
    pub fn unset(&self, id: &ObjectId, keys: &[String]) -> Vec<String> {
        let removed = match self.entries.get_mut(id.as_str()) {
            Some(mut entry) => entry.unset(keys),
            None => Vec::new(),
        };
        self.publish(id.clone(), &removed);
        removed
    }

    /// Evict one object.
    pub fn remove(&self, id: &str) -> Option<ObjectDetails> {
        let removed = self.entries.remove(id).map(|(_, d)| d);
        if let Some(details) = &removed {
            let _ = self.change_tx.send(DetailsChange::Removed(details.id.clone()));
        }
        removed
    }

    /// Drop everything (logout, account switch).
    pub fn clear(&self) {
        self.entries.clear();
        let _ = self.change_tx.send(DetailsChange::Cleared);
    }

    fn publish(&self, id: ObjectId, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        trace!("details of {} changed: {:?}", id, keys);
        let _ = self.change_tx.send(DetailsChange::Updated { id, keys: keys.to_vec() });
    }
}

// ============================================================================
// Tests
// ============================================================================
