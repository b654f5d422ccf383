//! API Module
//!
//! HTTP handlers and routing for the cache debug panel.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Cache counters
//! - `GET /entries` - Stored entries
//! - `DELETE /entries/:key` - Invalidate a key
//! - `POST /clear` - Clear everything
//! - `POST /clear-expired` - Sweep expired entries

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
