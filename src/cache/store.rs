//! Cache Store Module
//!
//! Authoritative value/expiry state and freshness queries.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::cache::CacheEntry;

// == Cache Store ==
/// Keyed storage of values with TTL expiry.
///
/// A key that is absent is treated exactly like an expired one. `set` is
/// last-writer-wins; deduplicating concurrent fetches happens above this layer.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // == Get ==
    /// Returns the stored value, fresh or not.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Returns the stored value only while it is fresh.
    pub fn get_fresh(&self, key: &str) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| &entry.value)
    }

    /// Returns the full entry for diagnostics.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Set ==
    /// Stores a value fresh for `ttl`, overwriting value and expiry unconditionally.
    pub fn set(&mut self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.entries.insert(key.into(), CacheEntry::new(value, ttl));
    }

    // == Is Expired ==
    /// True if the key is missing or its expiry has passed.
    pub fn is_expired(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.is_expired())
            .unwrap_or(true)
    }

    // == Extend Expiry ==
    /// Pushes an existing entry's expiry to `now + ttl` without touching its value.
    ///
    /// Returns false when there is nothing stored for the key.
    pub fn extend_expiry(&mut self, key: &str, ttl: Duration) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.extend(ttl);
                true
            }
            None => false,
        }
    }

    // == Delete ==
    /// Removes an entry. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    // == Clear ==
    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the number of entries removed.
    pub fn clear_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - self.entries.len()
    }

    // == Iteration ==
    /// Iterates over all entries.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }

    /// Returns every stored key.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    // == Length ==
    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
