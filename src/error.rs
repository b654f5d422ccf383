//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// The enum is `Clone` because a single shared fetch result is handed to
/// every binding waiting on the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The fetcher for a key rejected
    #[error("Fetch failed for {key}: {message}")]
    Fetch { key: String, message: String },

    /// A value could not be converted to or from its stored JSON form
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error (e.g. a shared fetch task panicked)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a fetcher failure, keeping the whole `anyhow` context chain.
    pub fn fetch(key: impl Into<String>, err: &anyhow::Error) -> Self {
        CacheError::Fetch {
            key: key.into(),
            message: format!("{:#}", err),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Serialization(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
