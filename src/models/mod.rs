//! Request and Response models for the debug panel API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP query strings and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::EntriesQuery;
pub use responses::{
    ClearResponse, EntriesResponse, ErrorResponse, HealthResponse, InvalidateResponse,
    StatsResponse,
};
