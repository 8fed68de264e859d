//! Entity metadata registry.
//!
//! # Responsibility
//! - Build one `EntityDescriptor` per entity type on first use.
//! - Share built descriptors process-wide for the life of the process.
//!
//! # Invariants
//! - Concurrent first callers for the same type build exactly one descriptor.
//! - Descriptors are never evicted or rebuilt once published.

pub mod descriptor;
mod metadata;

pub use descriptor::{
    conventional_table_name, CollectionDescriptor, EntityDescriptor, FieldDescriptor, FieldUsage,
};
pub use metadata::{describe, MetadataRegistry};
