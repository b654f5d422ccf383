//! Portal Cache - An in-memory stale-while-revalidate data cache
//!
//! Provides TTL expiry, per-key subscriber fan-out, shared fetch
//! deduplication and optimistic mutation, plus a small debug panel.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{
    CacheBinding, CacheKey, CacheManager, CacheOptions, PaginatedBinding, PaginatedOptions,
};
pub use config::{CacheConfig, TtlPolicy};
pub use error::{CacheError, Result};
pub use tasks::spawn_sweep_task;
