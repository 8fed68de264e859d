//! Relational mapper: statements, parameter binding and row hydration.
//!
//! # Responsibility
//! - Build CRUD statement text once per entity type and dialect prefix.
//! - Bind entity fields as named parameters and hydrate rows into entities.
//!
//! # Invariants
//! - Only caller-supplied `query` SQL is built per call.
//! - Result columns are bound to field ordinals once per column layout.
//! - get/update/delete on key-less types fail with `Unsupported`.

pub(crate) mod hydrate;
mod relational;
pub(crate) mod statements;

pub use relational::RelationalMapper;
pub use statements::{build_statements, SqlStatements};
