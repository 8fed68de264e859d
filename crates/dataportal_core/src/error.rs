//! Caller-facing error taxonomy.
//!
//! # Responsibility
//! - Fold layer errors into one `DataError` returned by every CRUD call.
//! - Carry errors across the portal boundary as plain data (`RemoteFault`).
//!
//! # Invariants
//! - Every `DataError` maps to exactly one `ErrorKind`.
//! - A fault re-raised from a remote peer keeps the kind it had there.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::MappingError;
use crate::portal::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;

/// Distinguishable failure classes of a CRUD call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    DescriptorConflict,
    /// Column value could not be converted to or from a field.
    Mapping,
    Unsupported,
    Storage,
    Transport,
    Serialization,
    /// Remote operation panicked; only produced by the portal server.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Configuration => "configuration",
            Self::DescriptorConflict => "descriptor_conflict",
            Self::Mapping => "mapping",
            Self::Unsupported => "unsupported",
            Self::Storage => "storage",
            Self::Transport => "transport",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Error value returned by a remote peer instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} failure in `{entity}`: {message}")]
pub struct RemoteFault {
    pub kind: ErrorKind,
    pub message: String,
    pub entity: String,
}

impl RemoteFault {
    pub fn from_error(err: &DataError, entity: &str) -> Self {
        match err {
            DataError::Remote(fault) => fault.clone(),
            other => Self {
                kind: other.kind(),
                message: other.to_string(),
                entity: entity.to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("operation `{operation}` is not supported for `{entity}`: type has no primary key")]
    Unsupported {
        operation: &'static str,
        entity: &'static str,
    },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("remote call failed: {0}")]
    Remote(RemoteFault),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

impl DataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Mapping(err) if err.is_descriptor_conflict() => ErrorKind::DescriptorConflict,
            Self::Mapping(_) => ErrorKind::Mapping,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Db(_) => ErrorKind::Storage,
            Self::Remote(fault) => fault.kind,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the failure was raised on a remote peer and carried back as data.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub(crate) fn unsupported(operation: &'static str, entity: &'static str) -> Self {
        Self::Unsupported { operation, entity }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{DataError, ErrorKind, RemoteFault};
    use crate::config::ConfigError;
    use crate::model::MappingError;

    #[test]
    fn kinds_follow_taxonomy() {
        let conflict = DataError::from(MappingError::DuplicateColumn {
            entity: "Order",
            column: "Name".into(),
        });
        assert_eq!(conflict.kind(), ErrorKind::DescriptorConflict);

        let conversion = DataError::from(MappingError::ValueConversion {
            expected: "i64",
            found: "text".into(),
        });
        assert_eq!(conversion.kind(), ErrorKind::Mapping);

        let missing = DataError::from(ConfigError::Missing("DbConnectionString".into()));
        assert_eq!(missing.kind(), ErrorKind::Configuration);

        assert_eq!(
            DataError::unsupported("get", "Log").kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn remote_fault_keeps_original_kind() {
        let local = DataError::unsupported("delete", "Log");
        let fault = RemoteFault::from_error(&local, "Log");
        assert_eq!(fault.kind, ErrorKind::Unsupported);

        let reraised = DataError::Remote(fault.clone());
        assert!(reraised.is_remote());
        assert_eq!(reraised.kind(), ErrorKind::Unsupported);
        assert_eq!(RemoteFault::from_error(&reraised, "Other"), fault);
    }
}
