//! Paginated Binding Module
//!
//! Accumulates pages of a list on top of per-page cache bindings. Page `n`
//! is cached under `<key>_page_<n>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use crate::cache::binding::{CacheBinding, CacheOptions, CacheValue};
use crate::cache::key::{CacheKey, Params};
use crate::cache::CacheManager;
use crate::error::{CacheError, Result};

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Boxed page producer: `(page, page_size, params) -> items`.
pub type PageFetcher<T> =
    Arc<dyn Fn(u32, usize, Params) -> BoxFuture<'static, anyhow::Result<Vec<T>>> + Send + Sync>;

/// Configuration for a paginated binding.
#[derive(Debug, Clone)]
pub struct PaginatedOptions {
    pub page_size: usize,
    pub cache: CacheOptions,
}

impl Default for PaginatedOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache: CacheOptions::default(),
        }
    }
}

impl PaginatedOptions {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    pub fn cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }
}

#[derive(Debug)]
struct PageState<T> {
    page: u32,
    items: Vec<T>,
    has_more: bool,
    is_loading: bool,
    error: Option<CacheError>,
}

struct PaginatedInner<T> {
    manager: CacheManager,
    key: CacheKey,
    ttl: Duration,
    page_size: usize,
    options: CacheOptions,
    fetcher: PageFetcher<T>,
    state: Mutex<PageState<T>>,
    current: Mutex<Option<CacheBinding<Vec<T>>>>,
    /// Held for the duration of a page load
    loading: tokio::sync::Mutex<()>,
    /// Bumped by `refresh` so loads started earlier are discarded
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// == Paginated Binding ==
/// A growing list loaded page by page.
///
/// A page shorter than `page_size` is taken to mean there is no more data.
pub struct PaginatedBinding<T> {
    inner: Arc<PaginatedInner<T>>,
}

impl<T> Clone for PaginatedBinding<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CacheValue> PaginatedBinding<T> {
    pub(crate) fn new(
        manager: CacheManager,
        key: CacheKey,
        ttl: Duration,
        fetcher: PageFetcher<T>,
        options: PaginatedOptions,
    ) -> Self {
        Self {
            inner: Arc::new(PaginatedInner {
                manager,
                key,
                ttl,
                page_size: options.page_size,
                options: options.cache,
                fetcher,
                state: Mutex::new(PageState {
                    page: 1,
                    items: Vec::new(),
                    has_more: true,
                    is_loading: false,
                    error: None,
                }),
                current: Mutex::new(None),
                loading: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    // == Accessors ==
    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.options.enabled
    }

    pub fn page(&self) -> u32 {
        lock(&self.inner.state).page
    }

    pub fn items(&self) -> Vec<T> {
        lock(&self.inner.state).items.clone()
    }

    pub fn has_more(&self) -> bool {
        lock(&self.inner.state).has_more
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner.state).is_loading
    }

    pub fn error(&self) -> Option<CacheError> {
        lock(&self.inner.state).error.clone()
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    // == Load Page ==
    /// Fetches `page` through its own cache binding.
    ///
    /// Page 1 replaces the accumulated items, later pages append. Returns the
    /// items of the fetched page, or `None` when the load was not performed:
    /// another load was already running, or a [`refresh`](Self::refresh)
    /// reset the list before this page arrived.
    pub async fn load_page(&self, page: u32, force: bool) -> Result<Option<Vec<T>>> {
        let Ok(_loading) = self.inner.loading.try_lock() else {
            debug!(key = %self.inner.key, page, "Page load already running");
            return Ok(None);
        };
        self.run_load(page, force).await
    }

    async fn run_load(&self, page: u32, force: bool) -> Result<Option<Vec<T>>> {
        let generation = self.inner.generation.load(Ordering::Acquire);
        lock(&self.inner.state).is_loading = true;

        let binding = self.page_binding(page);
        let result = binding.fetch(force).await;

        if self.inner.generation.load(Ordering::Acquire) != generation {
            debug!(key = %self.inner.key, page, "Dropping page loaded before a refresh");
            return Ok(None);
        }
        *lock(&self.inner.current) = Some(binding);

        let mut state = lock(&self.inner.state);
        state.is_loading = false;
        match result {
            Ok(items) => {
                let items = items.unwrap_or_default();
                if page <= 1 {
                    state.items = items.clone();
                } else {
                    state.items.extend(items.iter().cloned());
                }
                state.page = page;
                state.has_more = items.len() >= self.inner.page_size;
                state.error = None;
                Ok(Some(items))
            }
            Err(err) => {
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn page_binding(&self, page: u32) -> CacheBinding<Vec<T>> {
        let fetcher = Arc::clone(&self.inner.fetcher);
        let page_size = self.inner.page_size;
        CacheBinding::new(
            self.inner.manager.clone(),
            self.inner.key.page(page),
            self.inner.ttl,
            Arc::new(move |params| fetcher(page, page_size, params)),
            self.inner.options.clone(),
        )
    }

    // == Load More ==
    /// Loads the next page. Does nothing while a load is running or once
    /// the end has been reached; returns whether a page was applied.
    pub async fn load_more(&self) -> Result<bool> {
        let next = {
            let state = lock(&self.inner.state);
            if state.is_loading || !state.has_more {
                return Ok(false);
            }
            state.page + 1
        };
        Ok(self.load_page(next, false).await?.is_some())
    }

    // == Refresh ==
    /// Resets to page 1, clears the items and forces a refetch.
    ///
    /// A page load already running is allowed to finish but its result is
    /// discarded. Returns `None` only if a later refresh superseded this one.
    pub async fn refresh(&self) -> Result<Option<Vec<T>>> {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        {
            let mut state = lock(&self.inner.state);
            state.page = 1;
            state.items.clear();
            state.has_more = true;
        }
        let _loading = self.inner.loading.lock().await;
        self.run_load(1, true).await
    }
}
