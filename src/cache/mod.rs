//! Cache Module
//!
//! In-memory stale-while-revalidate cache: TTL store, subscriber fan-out,
//! shared fetch orchestration and the paginated list variant.

pub mod binding;
mod entry;
pub mod events;
pub mod key;
mod manager;
pub mod paginated;
pub mod registry;
mod stats;
mod store;


// Re-export public types
pub use binding::{BindingState, CacheBinding, CacheOptions, CacheValue, LivenessToken};
pub use entry::CacheEntry;
pub use events::{CacheEvent, CacheEventKind};
pub use key::{CacheKey, Params};
pub use manager::{CacheManager, EntryInfo};
pub use paginated::{PaginatedBinding, PaginatedOptions};
pub use registry::{SubscriberRegistry, Subscription};
pub use stats::CacheStats;
pub use store::CacheStore;
