//! Entity persistence core: declarative mapping, cached data access and a
//! location-transparent data portal.
//! This crate is the single source of truth for mapping and cache invariants.

pub mod access;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod model;
pub mod portal;
pub mod registry;

pub use access::{DataAccess, DataAccessFactory, ErasedDataAccess, WriteOutcome};
pub use cache::{CacheCoordinator, CacheStore, CacheStoreRegistry, MemoryCacheStore};
pub use config::{CacheSettings, ConfigError, Settings};
pub use db::{ConnectionFactory, SqliteConnectionFactory};
pub use error::{DataError, DataResult, ErrorKind, RemoteFault};
pub use logging::{
    default_log_level, init_logging, init_logging_from_settings, init_logging_with, logging_status,
    LoggingConfig,
};
pub use model::entity::{Entity, EntityMapping, EntityStamp, FieldDirective, Record};
pub use model::value::{ColumnEnum, ColumnSerialize, ColumnValue, Json, SqlValue, ValueType};
pub use model::MappingError;
pub use portal::{
    CrudCapability, DataPortal, ExecutionContext, LoopbackConnector, PortalEnvironment,
    PortalHooks, PortalServer,
};
pub use registry::{describe, EntityDescriptor};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
