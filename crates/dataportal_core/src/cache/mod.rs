//! Two-tier entity cache with relation-based invalidation.
//!
//! # Responsibility
//! - Provide swappable expiring stores selected by name.
//! - Keep model, query and relation keys consistent across mutations.
//!
//! # Invariants
//! - A cached query is served only when every model it lists is cached.
//! - Relation keys list each query key at most once.
//! - Cache failures are logged at `warn` and never fail the caller.

mod coordinator;
mod keys;
mod store;

pub use coordinator::CacheCoordinator;
pub use keys::{CacheKeys, KeyScope};
pub use store::{
    CacheError, CacheResult, CacheStats, CacheStore, CacheStoreRegistry, MemoryCacheStore,
    NullCacheStore, StoreBuilder, MEMORY_STORE, NULL_STORE,
};
