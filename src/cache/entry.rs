//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// Longest freshness window an entry can have (about 30 years).
pub const MAX_TTL: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + ttl`, clamped so oversized TTLs cannot overflow the clock.
fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

// == Cache Entry ==
/// Represents a single cache entry with value and expiry metadata.
///
/// Timestamps come from `tokio::time::Instant` so a paused test runtime
/// controls expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// When the value was written
    pub created_at: Instant,
    /// When the value stops being fresh
    pub expires_at: Instant,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry that is fresh for `ttl`.
    pub fn new(value: Value, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            expires_at: expiry_after(now, ttl),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// the expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Checks expiry against an explicit instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    // == Extend ==
    /// Pushes the expiry out to `now + ttl`, leaving the value untouched.
    pub fn extend(&mut self, ttl: Duration) {
        self.expires_at = expiry_after(Instant::now(), ttl);
    }

    // == Time To Live ==
    /// Returns remaining freshness, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Age of the stored value.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_at)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entry_fresh_before_ttl() {
        let entry = CacheEntry::new(json!("value"), Duration::from_secs(60));

        assert_eq!(entry.value, json!("value"));
        assert!(!entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiration() {
        let entry = CacheEntry::new(json!(1), Duration::from_secs(1));
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_remaining() {
        let entry = CacheEntry::new(json!(1), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(entry.ttl_remaining(), Duration::from_secs(6));
        assert_eq!(entry.age(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_remaining_expired() {
        let entry = CacheEntry::new(json!(1), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(entry.ttl_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_keeps_value() {
        let mut entry = CacheEntry::new(json!([1, 2]), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(entry.is_expired());

        entry.extend(Duration::from_secs(10));
        assert!(!entry.is_expired());
        assert_eq!(entry.value, json!([1, 2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_ttl_is_clamped() {
        let mut entry = CacheEntry::new(json!(1), Duration::MAX);
        assert!(!entry.is_expired());
        assert_eq!(entry.ttl_remaining(), MAX_TTL);

        entry.extend(Duration::MAX);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Instant::now();
        let entry = CacheEntry {
            value: json!("test"),
            created_at: now,
            expires_at: now,
        };

        assert!(entry.is_expired_at(now), "Entry should be expired at boundary");
    }
}
