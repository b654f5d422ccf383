//! Configuration Module
//!
//! Handles the cache tunables and the per-prefix TTL policy table.

use std::env;
use std::time::Duration;

// == Defaults ==
/// Global default TTL used when no policy prefix matches (5 minutes).
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Default interval between background sweeps (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Default expiry multiplier applied to a stored value when its refetch fails.
pub const DEFAULT_FAILURE_TTL_MULTIPLIER: u32 = 2;

// == TTL Policy ==
/// Static mapping from semantic key prefixes to default TTLs.
///
/// Looked up by the base name of a cache key. When several prefixes match,
/// the longest one wins.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    prefixes: Vec<(String, Duration)>,
    fallback: Duration,
}

impl TtlPolicy {
    /// Creates an empty policy that resolves every key to `fallback`.
    pub fn new(fallback: Duration) -> Self {
        Self {
            prefixes: Vec::new(),
            fallback,
        }
    }

    /// Registers (or replaces) the TTL for a key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>, ttl: Duration) -> Self {
        let prefix = prefix.into();
        self.prefixes.retain(|(p, _)| *p != prefix);
        self.prefixes.push((prefix, ttl));
        self
    }

    /// Resolves the TTL for a key's base name.
    ///
    /// A prefix matches the whole base name or a leading `_`-separated
    /// segment of it, so `users` covers `users_list` but not `usersettings`.
    pub fn ttl_for(&self, base: &str) -> Duration {
        self.prefixes
            .iter()
            .filter(|(prefix, _)| prefix_matches(base, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.fallback)
    }

    /// TTL used for unrecognized prefixes.
    pub fn fallback(&self) -> Duration {
        self.fallback
    }
}

fn prefix_matches(base: &str, prefix: &str) -> bool {
    match base.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('_'),
        None => false,
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self::new(Duration::from_millis(DEFAULT_TTL_MS))
            .with_prefix("users", minutes(10))
            .with_prefix("categories", minutes(30))
            .with_prefix("notifications", minutes(1))
            .with_prefix("news", minutes(5))
            .with_prefix("trainings", minutes(15))
            .with_prefix("feedback", minutes(2))
    }
}

// == Cache Config ==
/// Cache engine configuration.
///
/// All scalar values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Per-prefix TTL table
    pub ttl_policy: TtlPolicy,
    /// Interval between background sweeps of expired entries
    pub sweep_interval: Duration,
    /// On fetch failure an existing value's expiry becomes `now + multiplier * ttl`
    pub failure_ttl_multiplier: u32,
    /// Debug panel HTTP port
    pub server_port: u16,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DEFAULT_TTL_MS` - Fallback TTL in milliseconds (default: 300000)
    /// - `SWEEP_INTERVAL_SECS` - Sweep frequency in seconds (default: 300)
    /// - `FAILURE_TTL_MULTIPLIER` - Expiry extension factor on fetch failure (default: 2)
    /// - `SERVER_PORT` - Debug panel port (default: 3000)
    pub fn from_env() -> Self {
        let default_ttl_ms: u64 = env_or("DEFAULT_TTL_MS", DEFAULT_TTL_MS);
        let mut ttl_policy = TtlPolicy::default();
        ttl_policy.fallback = Duration::from_millis(default_ttl_ms);

        Self {
            ttl_policy,
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            failure_ttl_multiplier: env_or(
                "FAILURE_TTL_MULTIPLIER",
                DEFAULT_FAILURE_TTL_MULTIPLIER,
            ),
            server_port: env_or("SERVER_PORT", 3000),
        }
    }

    /// Replaces the TTL policy table.
    pub fn with_ttl_policy(mut self, ttl_policy: TtlPolicy) -> Self {
        self.ttl_policy = ttl_policy;
        self
    }

    /// Sets the failure expiry multiplier.
    pub fn with_failure_ttl_multiplier(mut self, multiplier: u32) -> Self {
        self.failure_ttl_multiplier = multiplier;
        self
    }

    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_policy: TtlPolicy::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            failure_ttl_multiplier: DEFAULT_FAILURE_TTL_MULTIPLIER,
            server_port: 3000,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
