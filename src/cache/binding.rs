//! Cache Binding Module
//!
//! The stateful accessor a consumer holds for one key: it decides between a
//! cache hit, a stale-while-revalidate read and a blocking fetch, and keeps
//! its local view in sync with writes made through other bindings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::cache::key::{CacheKey, Params};
use crate::cache::registry::{SubscriberId, Subscription};
use crate::cache::CacheManager;
use crate::error::{CacheError, Result};

/// Values a binding can hold.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Boxed asynchronous data producer.
pub type Fetcher<T> = Arc<dyn Fn(Params) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Callback invoked when a fetch fails.
pub type ErrorCallback = Arc<dyn Fn(&CacheError) + Send + Sync>;

// == Options ==
/// Per-binding configuration.
#[derive(Clone)]
pub struct CacheOptions {
    /// Freshness window; `None` resolves from the TTL policy table
    pub ttl: Option<Duration>,
    /// Merged into the cache key and passed to the fetcher
    pub params: Params,
    /// When false, no automatic fetch happens
    pub enabled: bool,
    /// Expose stored stale data while a fetch runs
    pub stale_while_revalidate: bool,
    /// Called on fetch failure in addition to recording the error
    pub on_error: Option<ErrorCallback>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            params: Params::new(),
            enabled: true,
            stale_while_revalidate: true,
            on_error: None,
        }
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl", &self.ttl)
            .field("params", &self.params)
            .field("enabled", &self.enabled)
            .field("stale_while_revalidate", &self.stale_while_revalidate)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Adds a single parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_while_revalidate(mut self, swr: bool) -> Self {
        self.stale_while_revalidate = swr;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

// == State ==
/// What a binding currently knows.
#[derive(Debug, Clone)]
pub struct BindingState<T> {
    pub data: Option<T>,
    pub error: Option<CacheError>,
    pub is_loading: bool,
}

impl<T> Default for BindingState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
        }
    }
}

// == Liveness ==
/// Revoked when a binding is deactivated; late results check it before
/// touching local state.
#[derive(Debug, Clone)]
pub struct LivenessToken(Arc<AtomicBool>);

impl LivenessToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for LivenessToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a boolean in-flight flag for its lifetime.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct BindingInner<T> {
    manager: CacheManager,
    key: CacheKey,
    ttl: Duration,
    params: Params,
    enabled: bool,
    stale_while_revalidate: bool,
    on_error: Option<ErrorCallback>,
    fetcher: Fetcher<T>,
    state: Arc<Mutex<BindingState<T>>>,
    in_flight: AtomicBool,
    liveness: LivenessToken,
    subscription: Mutex<Option<Subscription>>,
}

impl<T> Drop for BindingInner<T> {
    fn drop(&mut self) {
        self.liveness.revoke();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// == Cache Binding ==
/// A consumer's handle on one cache key.
///
/// Clones share state; the binding stays subscribed until [`deactivate`]
/// is called or the last clone is dropped.
///
/// [`deactivate`]: CacheBinding::deactivate
pub struct CacheBinding<T> {
    inner: Arc<BindingInner<T>>,
}

impl<T> Clone for CacheBinding<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBinding")
            .field("key", &self.inner.key.as_str())
            .field("ttl", &self.inner.ttl)
            .field("state", &*lock(&self.inner.state))
            .finish()
    }
}

impl<T: CacheValue> CacheBinding<T> {
    /// Creates the binding and subscribes it to its key.
    pub(crate) fn new(
        manager: CacheManager,
        key: CacheKey,
        ttl: Duration,
        fetcher: Fetcher<T>,
        options: CacheOptions,
    ) -> Self {
        let state = Arc::new(Mutex::new(BindingState::default()));
        let liveness = LivenessToken::new();

        let subscription = {
            let state = Arc::clone(&state);
            let liveness = liveness.clone();
            let key_name = key.to_string();
            manager.subscribe(key.as_str(), move |value| {
                if !liveness.is_alive() {
                    return;
                }
                match serde_json::from_value::<T>(value.clone()) {
                    Ok(data) => lock(&state).data = Some(data),
                    Err(err) => warn!(key = %key_name, error = %err, "Ignoring undecodable update"),
                }
            })
        };

        Self {
            inner: Arc::new(BindingInner {
                manager,
                key,
                ttl,
                params: options.params,
                enabled: options.enabled,
                stale_while_revalidate: options.stale_while_revalidate,
                on_error: options.on_error,
                fetcher,
                state,
                in_flight: AtomicBool::new(false),
                liveness,
                subscription: Mutex::new(Some(subscription)),
            }),
        }
    }

    // == Accessors ==
    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Current best-known value.
    pub fn data(&self) -> Option<T> {
        lock(&self.inner.state).data.clone()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner.state).is_loading
    }

    pub fn error(&self) -> Option<CacheError> {
        lock(&self.inner.state).error.clone()
    }

    /// Snapshot of data, error and loading flag together.
    pub fn state(&self) -> BindingState<T> {
        lock(&self.inner.state).clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.liveness.is_alive()
    }

    fn subscriber_id(&self) -> Option<SubscriberId> {
        lock(&self.inner.subscription).as_ref().map(|s| s.id())
    }

    fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut BindingState<T>),
    {
        if self.inner.liveness.is_alive() {
            apply(&mut lock(&self.inner.state));
        }
    }

    // == Fetch ==
    /// Runs the fetch algorithm.
    ///
    /// Without `force`, a fresh stored value is returned with no fetcher call.
    /// A call made while this binding already has a fetch outstanding is
    /// dropped and returns the current data.
    pub async fn fetch(&self, force: bool) -> Result<Option<T>> {
        let Some(_guard) = FlightGuard::acquire(&self.inner.in_flight) else {
            return Ok(self.data());
        };

        let manager = &self.inner.manager;
        let key = self.inner.key.as_str();

        if !force {
            if let Some(value) = manager.lookup_fresh(key) {
                let data: T = serde_json::from_value(value)?;
                self.update(|s| {
                    s.data = Some(data.clone());
                    s.error = None;
                    s.is_loading = false;
                });
                return Ok(Some(data));
            }
        }

        manager.record_miss(key);
        self.begin_fetch(key);

        let fetcher = Arc::clone(&self.inner.fetcher);
        let params = self.inner.params.clone();
        let result = manager
            .fetch_shared(key, self.inner.ttl, self.subscriber_id(), move || {
                async move {
                    let data = fetcher(params).await?;
                    serde_json::to_value(data).context("fetched value is not serializable")
                }
                .boxed()
            })
            .await
            .and_then(|value| serde_json::from_value::<T>(value).map_err(CacheError::from));

        match result {
            Ok(data) => {
                self.update(|s| {
                    s.data = Some(data.clone());
                    s.error = None;
                    s.is_loading = false;
                });
                Ok(Some(data))
            }
            Err(err) => {
                if self.inner.liveness.is_alive() {
                    {
                        let mut state = lock(&self.inner.state);
                        state.error = Some(err.clone());
                        state.is_loading = false;
                    }
                    if let Some(on_error) = &self.inner.on_error {
                        on_error(&err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Exposes a stored stale value or marks the binding as loading.
    fn begin_fetch(&self, key: &str) {
        let has_local = lock(&self.inner.state).data.is_some();
        let stale = if self.inner.stale_while_revalidate && !has_local {
            self.inner
                .manager
                .get(key)
                .and_then(|value| serde_json::from_value::<T>(value).ok())
        } else {
            None
        };

        match stale {
            Some(data) => {
                self.update(|s| s.data = Some(data));
                self.inner.manager.record_stale_served(key);
            }
            None => self.update(|s| s.is_loading = true),
        }
    }

    /// Forced refetch, ignoring freshness.
    pub async fn revalidate(&self) -> Result<Option<T>> {
        self.fetch(true).await
    }

    // == Invalidate ==
    /// Evicts the key and clears local state without refetching.
    pub fn invalidate(&self) {
        self.inner.manager.invalidate(self.inner.key.as_str());
        self.update(|s| *s = BindingState::default());
    }

    // == Mutate ==
    /// Writes `value` through to the store and every other subscriber.
    pub fn mutate(&self, value: T) -> Result<T> {
        let json = serde_json::to_value(&value)?;
        self.inner.manager.write_through(
            self.inner.key.as_str(),
            json,
            self.inner.ttl,
            self.subscriber_id(),
        );
        self.update(|s| {
            s.data = Some(value.clone());
            s.error = None;
        });
        Ok(value)
    }

    /// Like [`mutate`](Self::mutate) with a function of the previous value.
    ///
    /// The previous value is the stored one, or this binding's local data when
    /// nothing is stored.
    pub fn mutate_with<F>(&self, update: F) -> Result<T>
    where
        F: FnOnce(Option<T>) -> T,
    {
        let previous = match self.inner.manager.get_as::<T>(self.inner.key.as_str())? {
            Some(value) => Some(value),
            None => self.data(),
        };
        self.mutate(update(previous))
    }

    // == Deactivate ==
    /// Unsubscribes and stops applying results to this binding.
    ///
    /// A fetch already running keeps going and still populates the store.
    pub fn deactivate(&self) {
        self.inner.liveness.revoke();
        lock(&self.inner.subscription).take();
    }
}
