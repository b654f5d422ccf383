//! Background Tasks Module
//!
//! Contains background tasks that run periodically for the lifetime of a cache manager.
//!
//! # Tasks
//! - Expiry sweep: removes expired cache entries at a fixed interval

mod sweep;

pub use sweep::spawn_sweep_task;
