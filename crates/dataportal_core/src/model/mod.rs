//! Entity contract and declarative mapping vocabulary.
//!
//! # Responsibility
//! - Define the minimal contract every persisted entity exposes.
//! - Define mapping directives that replace runtime type introspection.
//! - Define column value conversions used by generated accessors.
//!
//! # Invariants
//! - Entity identity and equality are defined solely by `uid`.
//! - Directives are plain data; they are resolved once by the registry.

pub mod entity;
pub mod value;

use thiserror::Error;

/// Mapping failure raised while building descriptors or converting values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// Two fields of one type resolve to the same physical column.
    #[error("type `{entity}` maps more than one field to column `{column}`")]
    DuplicateColumn { entity: &'static str, column: String },
    #[error("type `{entity}` declares more than one primary key")]
    MultiplePrimaryKeys { entity: &'static str },
    #[error("type `{entity}` declares invalid SQL identifier `{identifier}`")]
    InvalidIdentifier {
        entity: &'static str,
        identifier: String,
    },
    #[error("type `{entity}` has no mapped field `{field}`")]
    UnknownField { entity: &'static str, field: String },
    #[error("cannot convert column value: expected {expected}, found {found}")]
    ValueConversion {
        expected: &'static str,
        found: String,
    },
}

impl MappingError {
    /// Whether this error is a descriptor conflict detected at first use.
    pub fn is_descriptor_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateColumn { .. }
                | Self::MultiplePrimaryKeys { .. }
                | Self::InvalidIdentifier { .. }
        )
    }
}
