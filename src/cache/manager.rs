//! Cache Manager Module
//!
//! The explicit, cloneable owner of the store, the subscriber registry, the
//! in-flight fetch table and the event hooks. One manager is built at startup
//! and handed to every consumer.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::binding::{CacheBinding, CacheOptions, CacheValue};
use crate::cache::events::{CacheEvent, CacheEventKind, EventHub};
use crate::cache::key::{CacheKey, Params};
use crate::cache::paginated::{PaginatedBinding, PaginatedOptions};
use crate::cache::registry::{panic_message, SubscriberId, SubscriberRegistry, Subscription};
use crate::cache::{CacheStats, CacheStore};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::spawn_sweep_task;

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

/// Removes a flight from the in-flight table when its task ends, including
/// by panic, so the next request for the key starts a new fetch.
struct FlightCleanup {
    manager: CacheManager,
    key: String,
    id: u64,
}

impl Drop for FlightCleanup {
    fn drop(&mut self) {
        self.manager.finish_flight(&self.key, self.id);
    }
}

struct ManagerInner {
    config: CacheConfig,
    store: Mutex<CacheStore>,
    registry: SubscriberRegistry,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_flight: AtomicU64,
    stats: Mutex<CacheStats>,
    events: EventHub,
    sweeper_started: AtomicBool,
}

/// Diagnostic view of one stored entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub fresh: bool,
    pub ttl_remaining_ms: u64,
    pub age_ms: u64,
    pub subscribers: usize,
}

// == Cache Manager ==
/// Process-wide cache engine handle. Clones share the same state.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("entries", &self.len())
            .field("subscribed_keys", &self.inner.registry.key_count())
            .field("in_flight", &lock(&self.inner.in_flight).len())
            .finish()
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CacheManager {
    // == Constructor ==
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store: Mutex::new(CacheStore::new()),
                registry: SubscriberRegistry::new(),
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                stats: Mutex::new(CacheStats::new()),
                events: EventHub::new(),
                sweeper_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// TTL for a key base name according to the policy table.
    pub fn ttl_for(&self, base: &str) -> Duration {
        self.inner.config.ttl_policy.ttl_for(base)
    }

    // == Bindings ==
    /// Creates an active binding for `base` + `options.params` without fetching.
    pub fn bind<T, F, Fut>(&self, base: &str, fetcher: F, options: CacheOptions) -> CacheBinding<T>
    where
        T: CacheValue,
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = CacheKey::new(base, &options.params);
        let ttl = options.ttl.unwrap_or_else(|| self.ttl_for(base));
        CacheBinding::new(
            self.clone(),
            key,
            ttl,
            Arc::new(move |params| fetcher(params).boxed()),
            options,
        )
    }

    /// Creates an active binding and runs the automatic initial fetch when enabled.
    ///
    /// A failed initial fetch is recorded on the binding (`error()`) and passed
    /// to `on_error`; it is not returned.
    pub async fn use_cache<T, F, Fut>(
        &self,
        base: &str,
        fetcher: F,
        options: CacheOptions,
    ) -> CacheBinding<T>
    where
        T: CacheValue,
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let binding = self.bind(base, fetcher, options);
        if binding.is_enabled() {
            let _ = binding.fetch(false).await;
        }
        binding
    }

    /// Creates a paginated binding and loads page 1 when enabled.
    pub async fn use_paginated<T, F, Fut>(
        &self,
        base: &str,
        fetcher: F,
        options: PaginatedOptions,
    ) -> PaginatedBinding<T>
    where
        T: CacheValue,
        F: Fn(u32, usize, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        let key = CacheKey::new(base, &options.cache.params);
        let ttl = options.cache.ttl.unwrap_or_else(|| self.ttl_for(base));
        let binding = PaginatedBinding::new(
            self.clone(),
            key,
            ttl,
            Arc::new(move |page, size, params| fetcher(page, size, params).boxed()),
            options,
        );
        if binding.is_enabled() {
            let _ = binding.load_page(1, false).await;
        }
        binding
    }

    // == Store Access ==
    /// Stored value for `key`, fresh or stale.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner.store).get(key).cloned()
    }

    /// Stored value for `key` only while fresh.
    pub fn get_fresh(&self, key: &str) -> Option<Value> {
        lock(&self.inner.store).get_fresh(key).cloned()
    }

    /// Typed read of a stored value, fresh or stale.
    pub fn get_as<T: CacheValue>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn is_expired(&self, key: &str) -> bool {
        lock(&self.inner.store).is_expired(key)
    }

    /// Writes a value without notifying subscribers.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut store = lock(&self.inner.store);
        store.set(key, value, ttl);
        lock(&self.inner.stats).set_total_entries(store.len());
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.store).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.store).is_empty()
    }

    /// Reads a fresh value on behalf of a binding, recording a hit when found.
    pub(crate) fn lookup_fresh(&self, key: &str) -> Option<Value> {
        let value = self.get_fresh(key)?;
        lock(&self.inner.stats).record_hit();
        debug!(key, "Cache hit");
        self.emit(CacheEvent::new(CacheEventKind::Hit, key));
        Some(value)
    }

    pub(crate) fn record_miss(&self, key: &str) {
        lock(&self.inner.stats).record_miss();
        debug!(key, "Cache miss");
        self.emit(CacheEvent::new(CacheEventKind::Miss, key));
    }

    pub(crate) fn record_stale_served(&self, key: &str) {
        lock(&self.inner.stats).record_stale_served();
        debug!(key, "Serving stale value while revalidating");
        self.emit(CacheEvent::new(CacheEventKind::StaleServed, key));
    }

    // == Mutation ==
    /// Writes `value` through to the store with a fresh expiry and notifies
    /// every subscriber of `key`. The fetcher is never involved.
    pub fn mutate<T: CacheValue>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.write_through(key, value, ttl, None);
        Ok(())
    }

    /// Like [`mutate`](Self::mutate) with a function of the previous stored value.
    pub fn mutate_with<T, F>(&self, key: &str, ttl: Duration, update: F) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce(Option<T>) -> T,
    {
        let next = update(self.get_as::<T>(key)?);
        self.mutate(key, &next, ttl)?;
        Ok(next)
    }

    pub(crate) fn write_through(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        origin: Option<SubscriberId>,
    ) {
        self.set(key, value.clone(), ttl);
        lock(&self.inner.stats).record_mutation();
        self.emit(CacheEvent::new(CacheEventKind::Mutate, key));
        self.inner.registry.notify(key, &value, origin);
    }

    // == Invalidation ==
    /// Deletes `key` from the store. Subscribers are not notified and nothing is refetched.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = {
            let mut store = lock(&self.inner.store);
            let removed = store.delete(key);
            lock(&self.inner.stats).set_total_entries(store.len());
            removed
        };
        if removed {
            lock(&self.inner.stats).record_invalidation();
            self.emit(CacheEvent::new(CacheEventKind::Invalidate, key));
        }
        removed
    }

    /// Empties the store and the subscriber registry.
    pub fn clear_all(&self) {
        lock(&self.inner.store).clear();
        self.inner.registry.clear();
        lock(&self.inner.stats).set_total_entries(0);
        info!("Cache cleared");
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        let removed = {
            let mut store = lock(&self.inner.store);
            let removed = store.clear_expired();
            let mut stats = lock(&self.inner.stats);
            stats.record_swept(removed);
            stats.set_total_entries(store.len());
            removed
        };
        self.emit(CacheEvent::new(CacheEventKind::Sweep, ""));
        removed
    }

    // == Subscribers ==
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(key, callback)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.registry.subscriber_count(key)
    }

    // == Shared Fetch ==
    /// Runs `start` for `key` unless a fetch for that key is already in
    /// flight, in which case the caller waits on the running one.
    ///
    /// The fetch runs on its own task, so it completes (storing the value and
    /// notifying subscribers) even if every waiter goes away.
    pub(crate) async fn fetch_shared<S>(
        &self,
        key: &str,
        ttl: Duration,
        origin: Option<SubscriberId>,
        start: S,
    ) -> Result<Value>
    where
        S: FnOnce() -> BoxFuture<'static, anyhow::Result<Value>>,
    {
        let shared = {
            let mut flights = lock(&self.inner.in_flight);
            match flights.get(key) {
                Some(flight) => {
                    debug!(key, "Joining in-flight fetch");
                    flight.fetch.clone()
                }
                None => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let fetch = start();
                    let manager = self.clone();
                    let owned_key = key.to_string();
                    let handle = tokio::spawn(async move {
                        let _flight = FlightCleanup {
                            manager: manager.clone(),
                            key: owned_key.clone(),
                            id,
                        };
                        let started = Instant::now();
                        let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
                            Ok(outcome) => outcome,
                            Err(payload) => Err(anyhow::anyhow!(
                                "fetcher panicked: {}",
                                panic_message(&*payload)
                            )),
                        };
                        manager.complete_fetch(&owned_key, ttl, origin, outcome, started.elapsed())
                    });
                    let fetch = async move {
                        handle.await.unwrap_or_else(|err| {
                            Err(CacheError::Internal(format!("fetch task failed: {}", err)))
                        })
                    }
                    .boxed()
                    .shared();
                    flights.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            fetch: fetch.clone(),
                        },
                    );
                    fetch
                }
            }
        };
        shared.await
    }

    fn complete_fetch(
        &self,
        key: &str,
        ttl: Duration,
        origin: Option<SubscriberId>,
        outcome: anyhow::Result<Value>,
        elapsed: Duration,
    ) -> Result<Value> {
        match outcome {
            Ok(value) => {
                self.set(key, value.clone(), ttl);
                lock(&self.inner.stats).record_fetch(true);
                debug!(key, elapsed_ms = elapsed.as_millis() as u64, "Fetch succeeded");
                self.emit(CacheEvent::new(CacheEventKind::FetchSuccess, key).with_duration(elapsed));
                self.inner.registry.notify(key, &value, origin);
                Ok(value)
            }
            Err(err) => {
                let extended = ttl.saturating_mul(self.inner.config.failure_ttl_multiplier);
                let kept = lock(&self.inner.store).extend_expiry(key, extended);
                lock(&self.inner.stats).record_fetch(false);
                warn!(key, kept_stale = kept, error = %format!("{:#}", err), "Fetch failed");
                self.emit(CacheEvent::new(CacheEventKind::FetchFailure, key).with_duration(elapsed));
                Err(CacheError::fetch(key, &err))
            }
        }
    }

    fn finish_flight(&self, key: &str, id: u64) {
        let mut flights = lock(&self.inner.in_flight);
        if flights.get(key).map(|f| f.id) == Some(id) {
            flights.remove(key);
        }
    }

    /// True while a shared fetch for `key` is running.
    pub fn is_fetching(&self, key: &str) -> bool {
        lock(&self.inner.in_flight).contains_key(key)
    }

    // == Events & Stats ==
    /// Registers a listener for structured cache events.
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.events.add_listener(listener);
    }

    fn emit(&self, event: CacheEvent) {
        self.inner.events.emit(event);
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = lock(&self.inner.stats).clone();
        stats.set_total_entries(self.len());
        stats
    }

    /// Number of keys with at least one live subscriber.
    pub fn subscribed_key_count(&self) -> usize {
        self.inner.registry.key_count()
    }

    /// Snapshot of every stored entry, sorted by key.
    pub fn entries(&self) -> Vec<EntryInfo> {
        let mut entries: Vec<EntryInfo> = {
            let store = lock(&self.inner.store);
            store
                .entries()
                .map(|(key, entry)| EntryInfo {
                    key: key.clone(),
                    fresh: !entry.is_expired(),
                    ttl_remaining_ms: entry.ttl_remaining().as_millis() as u64,
                    age_ms: entry.age().as_millis() as u64,
                    subscribers: 0,
                })
                .collect()
        };
        for entry in &mut entries {
            entry.subscribers = self.inner.registry.subscriber_count(&entry.key);
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    // == Background Sweep ==
    /// Starts the periodic expiry sweep. Only the first call spawns a task.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        if self.inner.sweeper_started.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(spawn_sweep_task(self.clone(), self.inner.config.sweep_interval))
    }
}
