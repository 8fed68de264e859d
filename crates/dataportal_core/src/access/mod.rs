//! Data access engine: relational mapper fronted by the local cache tier.
//!
//! # Responsibility
//! - Serve reads cache-first and populate the cache on a storage read.
//! - Apply writes to storage first, then update or invalidate the cache.
//! - Build one engine per entity type from settings and share it.
//!
//! # Invariants
//! - Cache mutation never precedes the authoritative write.
//! - Failed writes are returned, never retried.
//! - Insert also drops list-shaped cached queries (`remove_related`).

mod engine;
mod erased;
mod factory;

pub use engine::DataAccess;
pub use erased::{ErasedDataAccess, WriteOutcome};
pub use factory::DataAccessFactory;
