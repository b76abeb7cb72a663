//! History of finished builds

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::build::BuildSnapshot;

/// Build history entry
#[derive(Debug, Clone)]
pub struct BuildHistoryEntry {
    pub snapshot: BuildSnapshot,
    /// Insertion order, used for eviction
    pub order: u64,
}

#[derive(Default)]
struct Entries {
    by_key: HashMap<String, BuildHistoryEntry>,
    next_order: u64,
}

/// Bounded in-memory record of the most recent finished build per key
pub struct BuildHistory {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl BuildHistory {
    /// Create a history keeping at most `capacity` builds
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity,
        }
    }

    /// Get the last finished build for a key
    pub fn get(&self, key: &str) -> Option<BuildSnapshot> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.by_key.get(key).map(|e| e.snapshot.clone())
    }

    /// Record a finished build, replacing any earlier build of the same key
    pub fn insert(&self, snapshot: BuildSnapshot) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.by_key.remove(&snapshot.key);

        // Evict oldest if at capacity
        while entries.by_key.len() >= self.capacity {
            let oldest = entries
                .by_key
                .iter()
                .min_by_key(|(_, e)| e.order)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.by_key.remove(&key);
                }
                None => break,
            }
        }

        let order = entries.next_order;
        entries.next_order += 1;
        entries
            .by_key
            .insert(snapshot.key.clone(), BuildHistoryEntry { snapshot, order });
    }

    /// Remove a build from the history
    pub fn remove(&self, key: &str) -> Option<BuildSnapshot> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.by_key.remove(key).map(|e| e.snapshot)
    }

    /// All recorded builds, most recent first
    pub fn list(&self) -> Vec<BuildSnapshot> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<&BuildHistoryEntry> = entries.by_key.values().collect();
        all.sort_by(|a, b| b.order.cmp(&a.order));
        all.into_iter().map(|e| e.snapshot.clone()).collect()
    }

    /// Get history size
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.by_key.len()
    }

    /// Check if history is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
