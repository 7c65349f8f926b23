//! MemTable implementation
//!
//! SkipMap-based memtable. The map and its size counter form one generation;
//! `snapshot_and_clear` swaps in a fresh generation under a write lock, so no
//! concurrent `set` can land in the generation being flushed.
//!
//! The swapped-out generation stays readable as the frozen generation until
//! the flush that took it calls `release_frozen`.

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;

use crate::types::{Entry, KeyRange};

#[derive(Default)]
struct Generation {
    map: SkipMap<Vec<u8>, Entry>,
    size: AtomicUsize,
}

/// In-memory table for recent writes
pub struct MemTable {
    current: RwLock<Arc<Generation>>,
    /// Generation being flushed, still visible to readers
    frozen: RwLock<Option<Arc<Generation>>>,
    /// Flush once the size exceeds this many bytes
    size_limit: usize,
}

impl MemTable {
    /// Create a new empty MemTable with the given byte budget
    pub fn new(size_limit: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(Generation::default())),
            frozen: RwLock::new(None),
            size_limit,
        }
    }

    /// Insert or replace the entry for its key
    pub fn set(&self, entry: Entry) {
        let generation = self.current.read();
        let added = entry.charge();
        let removed = generation
            .map
            .get(&entry.key)
            .map_or(0, |old| old.value().charge());

        generation.map.insert(entry.key.clone(), entry);
        generation.size.fetch_add(added, Ordering::SeqCst);
        // Two writers replacing the same key may both subtract the old charge
        let _ = generation
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                Some(size.saturating_sub(removed))
            });
    }

    /// Latest entry for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        if let Some(entry) = self.current.read().map.get(key) {
            return Some(entry.value().clone());
        }
        self.frozen
            .read()
            .as_ref()
            .and_then(|generation| generation.map.get(key).map(|e| e.value().clone()))
    }

    /// Entries with keys in `range`, ascending
    pub fn range(&self, range: &KeyRange) -> Vec<Entry> {
        let lower = range
            .from
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Included);
        let upper = range
            .to
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Excluded);

        let current = Arc::clone(&*self.current.read());
        let frozen = self.frozen.read().clone();

        let mut entries: Vec<Entry> = current
            .map
            .range::<[u8], _>((lower, upper))
            .map(|e| e.value().clone())
            .collect();
        if let Some(frozen) = frozen {
            let shadowed: Vec<Entry> = frozen
                .map
                .range::<[u8], _>((lower, upper))
                .filter(|e| !current.map.contains_key(e.key()))
                .map(|e| e.value().clone())
                .collect();
            if !shadowed.is_empty() {
                entries.extend(shadowed);
                entries.sort_by(|a, b| a.key.cmp(&b.key));
            }
        }
        entries
    }

    /// Atomically take every entry (key order) and reset to empty
    ///
    /// The taken entries remain readable until `release_frozen`.
    pub fn snapshot_and_clear(&self) -> Vec<Entry> {
        let mut current = self.current.write();
        let old = std::mem::replace(&mut *current, Arc::new(Generation::default()));
        *self.frozen.write() = Some(Arc::clone(&old));
        drop(current);
        old.map.iter().map(|e| e.value().clone()).collect()
    }

    /// Forget the generation taken by the last `snapshot_and_clear`
    pub fn release_frozen(&self) {
        self.frozen.write().take();
    }

    /// Put the frozen generation back after a failed flush.
    /// Keys written since the snapshot keep their newer entry.
    pub fn restore_frozen(&self) {
        let frozen = match self.frozen.write().take() {
            Some(frozen) => frozen,
            None => return,
        };
        let current = self.current.read();
        for e in frozen.map.iter() {
            if !current.map.contains_key(e.key()) {
                current.size.fetch_add(e.value().charge(), Ordering::SeqCst);
                current.map.insert(e.key().clone(), e.value().clone());
            }
        }
    }

    /// Approximate size in bytes
    pub fn size(&self) -> usize {
        self.current.read().size.load(Ordering::SeqCst)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.current.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().map.is_empty()
    }

    /// Check if the size has grown past the budget
    pub fn is_full(&self) -> bool {
        self.size() > self.size_limit
    }

    pub fn size_limit(&self) -> usize {
        self.size_limit
    }
}
