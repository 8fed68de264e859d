//! Per-type engine construction from settings.
//!
//! # Responsibility
//! - Resolve connection strings, cache policy and cache store for each type.
//! - Memoize one engine per type and expose registered engines by type name.

use crate::access::engine::DataAccess;
use crate::access::erased::ErasedDataAccess;
use crate::cache::{CacheCoordinator, CacheStore, CacheStoreRegistry, KeyScope};
use crate::config::{CacheSettings, ConfigError, Settings};
use crate::db::{ConnectionFactory, SqliteConnectionFactory};
use crate::error::DataResult;
use crate::model::entity::Entity;
use crate::registry::{describe, EntityDescriptor};
use log::info;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type SharedEngine = Arc<dyn Any + Send + Sync>;

enum ConnectionSource {
    /// SQLite connection strings resolved from settings per entity type.
    Settings,
    Fixed(Arc<dyn ConnectionFactory>),
}

/// Builds and memoizes one `DataAccess` per entity type.
///
/// Settings are read while an engine is built and never per call. All
/// engines of one factory share a single cache store.
pub struct DataAccessFactory {
    settings: Settings,
    cache_settings: CacheSettings,
    store: Arc<dyn CacheStore>,
    connections: ConnectionSource,
    engines: RwLock<HashMap<TypeId, SharedEngine>>,
    by_name: RwLock<HashMap<String, Arc<dyn ErasedDataAccess>>>,
}

impl DataAccessFactory {
    /// Factory with the default store registry (`memory`, `none`).
    pub fn from_settings(settings: Settings) -> DataResult<Self> {
        Self::with_store_registry(settings, &CacheStoreRegistry::new())
    }

    /// Factory whose cache store is picked by `DataAccessCacheType`.
    ///
    /// # Errors
    /// - `Configuration` for invalid cache settings or an unknown store name.
    pub fn with_store_registry(
        settings: Settings,
        stores: &CacheStoreRegistry,
    ) -> DataResult<Self> {
        let cache_settings = CacheSettings::data_access(&settings)?;
        let store = stores.create(&cache_settings.store)?;
        info!(
            "event=data_access_factory module=access status=ok cache_enabled={} cache_store={} expiry_secs={}",
            cache_settings.enabled,
            store.name(),
            cache_settings.expiry.as_secs()
        );
        Ok(Self {
            settings,
            cache_settings,
            store,
            connections: ConnectionSource::Settings,
            engines: RwLock::new(HashMap::new()),
            by_name: RwLock::new(HashMap::new()),
        })
    }

    /// Uses `factory` for every entity type instead of configured strings.
    pub fn with_connections(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.connections = ConnectionSource::Fixed(factory);
        self
    }

    /// Replaces the configured cache store.
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = store;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache_store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Engine for `E`, built on first use and shared afterwards.
    pub fn engine<E: Entity>(&self) -> DataResult<Arc<DataAccess<E>>> {
        if let Some(found) = self.lookup::<E>() {
            return Ok(found);
        }

        let built: SharedEngine = Arc::new(self.build::<E>()?);
        let shared = {
            let mut engines = self.engines.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(engines.entry(TypeId::of::<E>()).or_insert(built))
        };
        let engine = downcast::<E>(shared)?;
        self.by_name
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(E::TYPE_NAME.to_string())
            .or_insert_with(|| engine.clone() as Arc<dyn ErasedDataAccess>);
        Ok(engine)
    }

    /// Makes `E` reachable by type name (portal server dispatch).
    pub fn register<E: Entity>(&self) -> DataResult<()> {
        self.engine::<E>().map(|_| ())
    }

    /// Engine registered under `type_name`.
    ///
    /// # Errors
    /// - `Configuration` when no engine was registered under that name.
    pub fn erased(&self, type_name: &str) -> DataResult<Arc<dyn ErasedDataAccess>> {
        self.by_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
            .ok_or_else(|| ConfigError::UnregisteredEntity(type_name.to_string()).into())
    }

    fn lookup<E: Entity>(&self) -> Option<Arc<DataAccess<E>>> {
        let shared = self
            .engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<E>())
            .cloned()?;
        downcast::<E>(shared).ok()
    }

    fn build<E: Entity>(&self) -> DataResult<DataAccess<E>> {
        let descriptor = describe::<E>()?;
        let connections = self.connection_factory(&descriptor)?;
        let cache = (self.cache_settings.enabled && !descriptor.cache_disabled()).then(|| {
            CacheCoordinator::new(
                Arc::clone(&descriptor),
                Arc::clone(&self.store),
                KeyScope::Plain,
                self.cache_settings.expiry,
            )
        });
        info!(
            "event=data_access_build module=access status=ok entity={} cached={}",
            E::TYPE_NAME,
            cache.is_some()
        );
        Ok(DataAccess::new(descriptor, connections, cache))
    }

    fn connection_factory<E: Entity>(
        &self,
        descriptor: &EntityDescriptor<E>,
    ) -> DataResult<Arc<dyn ConnectionFactory>> {
        match &self.connections {
            ConnectionSource::Fixed(factory) => Ok(Arc::clone(factory)),
            ConnectionSource::Settings => {
                let name = descriptor.connection();
                let value = self.settings.connection_string(name)?;
                let factory = SqliteConnectionFactory::from_connection_string(value).map_err(
                    |err| ConfigError::Invalid {
                        key: name.unwrap_or("ConnectionStrings").to_string(),
                        value: value.to_string(),
                        reason: err.to_string(),
                    },
                )?;
                Ok(Arc::new(factory))
            }
        }
    }
}

fn downcast<E: Entity>(shared: SharedEngine) -> DataResult<Arc<DataAccess<E>>> {
    shared
        .downcast::<DataAccess<E>>()
        .map_err(|_| ConfigError::UnregisteredEntity(E::TYPE_NAME.to_string()).into())
}
