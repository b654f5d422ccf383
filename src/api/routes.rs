//! API Routes
//!
//! Configures the Axum router with all debug panel endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_expired_handler, clear_handler, entries_handler, health_handler, invalidate_handler,
    stats_handler, AppState,
};

/// Creates the debug panel router.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /stats` - Cache counters
/// - `GET /entries` - Stored entries (`?prefix=` and `?expired=` filters)
/// - `DELETE /entries/:key` - Invalidate one key
/// - `POST /clear` - Clear everything
/// - `POST /clear-expired` - Sweep expired entries now
///
/// # Middleware
/// - CORS: Allows any origin (the panel is meant for local tooling)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/entries", get(entries_handler))
        .route("/entries/:key", delete(invalidate_handler))
        .route("/clear", post(clear_handler))
        .route("/clear-expired", post(clear_expired_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
