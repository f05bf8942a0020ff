//! Insertion-ordered set with least-recently-used eviction.

use std::hash::Hash;

use indexmap::IndexSet;

/// A set that remembers the order keys were last touched in.
///
/// Touching an existing key promotes it to the most-recent end; truncating
/// evicts from the least-recent end and hands the evicted keys back so the
/// caller can release whatever they referred to (the line iterator uses this
/// to drop cold chunks).
#[derive(Debug, Default, Clone)]
pub struct RecentSet<K: Hash + Eq> {
    set: IndexSet<K>,
}

impl<K: Hash + Eq> RecentSet<K> {
    pub fn new() -> Self {
        RecentSet {
            set: IndexSet::new(),
        }
    }

    /// Inserts or promotes each key, returning how many were newly inserted.
    pub fn touch<I: IntoIterator<Item = K>>(&mut self, keys: I) -> usize {
        let mut added = 0;
        for key in keys {
            if self.set.shift_remove(&key) {
                self.set.insert(key);
            } else {
                self.set.insert(key);
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, key: &K) -> bool {
        self.set.contains(key)
    }

    /// Reduces the set to at most `keep` keys, returning the evicted keys
    /// oldest-first.
    pub fn truncate(&mut self, keep: usize) -> Vec<K> {
        if self.set.len() <= keep {
            return Vec::new();
        }
        let excess = self.set.len() - keep;
        self.set.drain(..excess).collect()
    }

    /// Iterates keys oldest to newest.
    pub fn list(&self) -> impl Iterator<Item = &K> {
        self.set.iter()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}
