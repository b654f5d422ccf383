//! API Handlers
//!
//! HTTP request handlers for the cache debug panel endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::cache::CacheManager;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, EntriesQuery, EntriesResponse, HealthResponse, InvalidateResponse,
    StatsResponse,
};

/// Application state shared across all handlers.
///
/// The cache manager is itself a cheap, thread-safe handle.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Cache engine being inspected
    pub cache: CacheManager,
}

impl AppState {
    /// Creates a new AppState around an existing manager.
    pub fn new(cache: CacheManager) -> Self {
        Self { cache }
    }

    /// Creates a new AppState with a fresh manager built from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(CacheManager::new(config.clone()))
    }
}

/// Handler for GET /stats
///
/// Returns current cache counters.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.cache.stats(),
        state.cache.subscribed_key_count(),
    ))
}

/// Handler for GET /entries
///
/// Lists stored entries with their freshness, optionally filtered.
pub async fn entries_handler(
    State(state): State<AppState>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let entries = state
        .cache
        .entries()
        .into_iter()
        .filter(|entry| query.matches(&entry.key, entry.fresh))
        .collect();

    Ok(Json(EntriesResponse::new(entries)))
}

/// Handler for DELETE /entries/:key
///
/// Invalidates one key without refetching it.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<InvalidateResponse>> {
    if state.cache.invalidate(&key) {
        Ok(Json(InvalidateResponse::new(key)))
    } else {
        Err(CacheError::NotFound(key))
    }
}

/// Handler for POST /clear
///
/// Empties the store and the subscriber registry.
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let removed = state.cache.len();
    state.cache.clear_all();
    Json(ClearResponse::all(removed))
}

/// Handler for POST /clear-expired
///
/// Runs an expiry sweep immediately.
pub async fn clear_expired_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse::expired(state.cache.clear_expired()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
