//! Cache Statistics Module
//!
//! Tracks cache activity counters for the debug panel.

use serde::Serialize;

// == Cache Stats ==
/// Counters maintained by the cache manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads served from a fresh entry without calling the fetcher
    pub hits: u64,
    /// Reads that had to go to the fetcher (including forced revalidations)
    pub misses: u64,
    /// Times a stale value was exposed while a fetch was in progress
    pub stale_served: u64,
    /// Fetcher invocations that resolved
    pub fetches: u64,
    /// Fetcher invocations that rejected
    pub fetch_failures: u64,
    /// Direct writes through `mutate`
    pub mutations: u64,
    /// Explicit invalidations
    pub invalidations: u64,
    /// Entries removed by expiry sweeps
    pub swept: u64,
    /// Current number of entries in the store
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_stale_served(&mut self) {
        self.stale_served += 1;
    }

    pub fn record_fetch(&mut self, ok: bool) {
        if ok {
            self.fetches += 1;
        } else {
            self.fetch_failures += 1;
        }
    }

    pub fn record_mutation(&mut self) {
        self.mutations += 1;
    }

    pub fn record_invalidation(&mut self) {
        self.invalidations += 1;
    }

    pub fn record_swept(&mut self, count: usize) {
        self.swept += count as u64;
    }

    // == Update Entry Count ==
    /// Updates the total entries count.
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.fetch_failures, 0);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        for _ in 0..3 {
            stats.record_hit();
        }
        stats.record_miss();

        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_fetch_outcomes() {
        let mut stats = CacheStats::new();
        stats.record_fetch(true);
        stats.record_fetch(true);
        stats.record_fetch(false);

        assert_eq!(stats.fetches, 2);
        assert_eq!(stats.fetch_failures, 1);
    }

    #[test]
    fn test_record_swept_accumulates() {
        let mut stats = CacheStats::new();
        stats.record_swept(3);
        stats.record_swept(0);
        stats.record_swept(2);

        assert_eq!(stats.swept, 5);
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = CacheStats::new();
        stats.record_stale_served();
        stats.set_total_entries(4);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["stale_served"], 1);
        assert_eq!(json["total_entries"], 4);
    }
}
