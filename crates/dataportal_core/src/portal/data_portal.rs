//! Data portal: per-type dispatcher selection plus the portal cache tier.
//!
//! # Responsibility
//! - Select a local or remote dispatcher per entity type on first use.
//! - Front remote dispatchers with a context-scoped cache.
//! - Run observer hooks around every authoritative call.
//!
//! # Invariants
//! - Dispatcher selection reads settings once and is memoized per type.
//! - Cache mutation follows a successful dispatcher call.

use crate::access::DataAccessFactory;
use crate::cache::{CacheCoordinator, CacheStore, CacheStoreRegistry};
use crate::config::{CacheSettings, ConfigError, Settings, DATA_PORTAL_CLIENT, DATA_PORTAL_URL};
use crate::error::DataResult;
use crate::model::entity::{Entity, PortalRoute};
use crate::model::MappingError;
use crate::portal::context::ExecutionContext;
use crate::portal::dispatcher::{CrudCapability, Dispatcher, RemoteDispatcher};
use crate::portal::transport::{
    JsonPayloadSerializer, PayloadSerializer, Transport, TransportConnector,
};
use crate::registry::{describe, EntityDescriptor};
use log::info;
use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

const CLIENT_LOCAL: &str = "local";
const CLIENT_REMOTE: &str = "remote";

type SharedDispatcher = Arc<dyn Any + Send + Sync>;

/// Extension points around portal operations.
///
/// Hooks observe entities by shared reference and cannot change results.
pub trait PortalHooks<E>: Send + Sync {
    fn on_insert_begin(&self, _entity: &E) {}

    fn on_insert_completed(&self, _entity: &E) {}

    fn on_update_begin(&self, _entity: &E) {}

    fn on_update_completed(&self, _entity: &E) {}

    fn on_delete_begin(&self, _entity: &E) {}

    fn on_delete_completed(&self, _entity: &E) {}

    /// Called before a get or query reaches the dispatcher (cache misses only).
    fn on_query_begin(&self) {}

    fn on_query_completed(&self, _entities: &[E]) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<E> PortalHooks<E> for NoHooks {}

/// Process-wide portal wiring: settings, local engines, transports and the
/// portal cache store. Dispatchers are selected once per entity type.
pub struct PortalEnvironment {
    settings: Settings,
    cache_settings: CacheSettings,
    store: Arc<dyn CacheStore>,
    local: Arc<DataAccessFactory>,
    connector: Option<Arc<dyn TransportConnector>>,
    serializer: Arc<dyn PayloadSerializer>,
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
    dispatchers: RwLock<HashMap<TypeId, SharedDispatcher>>,
}

impl PortalEnvironment {
    /// Environment reading settings from `local`, default store registry.
    pub fn new(local: Arc<DataAccessFactory>) -> DataResult<Self> {
        Self::with_store_registry(local, &CacheStoreRegistry::new())
    }

    /// Environment whose portal store is picked by `DataPortalCacheType`.
    pub fn with_store_registry(
        local: Arc<DataAccessFactory>,
        stores: &CacheStoreRegistry,
    ) -> DataResult<Self> {
        let settings = local.settings().clone();
        let cache_settings = CacheSettings::data_portal(&settings)?;
        let store = stores.create(&cache_settings.store)?;
        Ok(Self {
            settings,
            cache_settings,
            store,
            local,
            connector: None,
            serializer: Arc::new(JsonPayloadSerializer),
            transports: RwLock::new(HashMap::new()),
            dispatchers: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn PayloadSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

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

    /// Dispatcher for `E`, selected on first use and memoized.
    ///
    /// # Errors
    /// - `Configuration` when the routing value is unknown, or a remote route
    ///   has no endpoint or no connector.
    /// - `Transport` when the endpoint cannot be connected.
    pub fn dispatcher<E: Entity>(&self) -> DataResult<Arc<Dispatcher<E>>> {
        if let Some(found) = self.lookup_dispatcher::<E>() {
            return Ok(found);
        }

        let descriptor = describe::<E>()?;
        let built: SharedDispatcher = Arc::new(self.build_dispatcher(&descriptor)?);
        let shared = {
            let mut dispatchers = self
                .dispatchers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(dispatchers.entry(TypeId::of::<E>()).or_insert(built))
        };
        shared
            .downcast::<Dispatcher<E>>()
            .map_err(|_| ConfigError::UnregisteredEntity(E::TYPE_NAME.to_string()).into())
    }

    fn lookup_dispatcher<E: Entity>(&self) -> Option<Arc<Dispatcher<E>>> {
        let shared = self
            .dispatchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<E>())
            .cloned()?;
        shared.downcast::<Dispatcher<E>>().ok()
    }

    fn build_dispatcher<E: Entity>(
        &self,
        descriptor: &EntityDescriptor<E>,
    ) -> DataResult<Dispatcher<E>> {
        let route = descriptor.portal_route().cloned().unwrap_or(PortalRoute {
            client_setting: DATA_PORTAL_CLIENT.to_string(),
            url_setting: DATA_PORTAL_URL.to_string(),
        });
        let client_key = if self.settings.get(&route.client_setting).is_some() {
            route.client_setting.as_str()
        } else {
            DATA_PORTAL_CLIENT
        };
        let client = self
            .settings
            .get_or(client_key, CLIENT_LOCAL)
            .to_ascii_lowercase();

        let dispatcher = match client.as_str() {
            CLIENT_LOCAL => Dispatcher::Local(self.local.engine::<E>()?),
            CLIENT_REMOTE => {
                let endpoint = self
                    .settings
                    .get(&route.url_setting)
                    .or_else(|| self.settings.get(DATA_PORTAL_URL))
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| ConfigError::Missing(route.url_setting.clone()))?;
                let transport = self.transport(endpoint)?;
                Dispatcher::Remote(RemoteDispatcher::new(
                    transport,
                    Arc::clone(&self.serializer),
                ))
            }
            other => {
                return Err(ConfigError::Invalid {
                    key: client_key.to_string(),
                    value: other.to_string(),
                    reason: "expected local|remote".to_string(),
                }
                .into())
            }
        };
        info!(
            "event=portal_dispatcher module=portal status=ok entity={} client={}",
            E::TYPE_NAME,
            client
        );
        Ok(dispatcher)
    }

    fn transport(&self, endpoint: &str) -> DataResult<Arc<dyn Transport>> {
        if let Some(found) = self
            .transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
        {
            return Ok(Arc::clone(found));
        }
        let connector = self
            .connector
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("transport connector".to_string()))?;
        let opened = connector.connect(endpoint)?;
        let mut transports = self
            .transports
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            transports.entry(endpoint.to_string()).or_insert(opened),
        ))
    }

    /// Portal cache for `E` in `context`: on only when enabled by settings,
    /// not disabled on the type, and the dispatcher is remote.
    fn portal_cache<E: Entity>(
        &self,
        descriptor: &Arc<EntityDescriptor<E>>,
        dispatcher: &Dispatcher<E>,
        context: &ExecutionContext,
    ) -> Option<CacheCoordinator<E>> {
        let enabled =
            self.cache_settings.enabled && !descriptor.cache_disabled() && dispatcher.is_remote();
        enabled.then(|| {
            CacheCoordinator::new(
                Arc::clone(descriptor),
                Arc::clone(&self.store),
                context.scope(),
                self.cache_settings.expiry,
            )
        })
    }
}

struct PortalState<E> {
    descriptor: Arc<EntityDescriptor<E>>,
    dispatcher: Arc<Dispatcher<E>>,
    cache: Option<CacheCoordinator<E>>,
}

/// Location-transparent CRUD facade for one entity type.
pub struct DataPortal<E> {
    env: Arc<PortalEnvironment>,
    context: ExecutionContext,
    hooks: Arc<dyn PortalHooks<E>>,
    state: OnceCell<PortalState<E>>,
}

impl<E: Entity> DataPortal<E> {
    /// Portal in a fresh execution context; routing resolves on first call.
    pub fn new(env: Arc<PortalEnvironment>) -> Self {
        Self {
            env,
            context: ExecutionContext::new(),
            hooks: Arc::new(NoHooks),
            state: OnceCell::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PortalHooks<E>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Same environment and hooks, cache scoped to `context`.
    pub fn in_context(&self, context: ExecutionContext) -> Self {
        Self {
            env: Arc::clone(&self.env),
            context,
            hooks: Arc::clone(&self.hooks),
            state: OnceCell::new(),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Whether calls go through the remote dispatcher.
    pub fn is_remote(&self) -> DataResult<bool> {
        Ok(self.state()?.dispatcher.is_remote())
    }

    /// Whether this portal keeps its own cache tier.
    pub fn is_cached(&self) -> DataResult<bool> {
        Ok(self.state()?.cache.is_some())
    }

    pub fn get(&self, key: &str) -> DataResult<Option<E>> {
        let state = self.state()?;
        if let Some(cached) = state.cache.as_ref().and_then(|cache| cache.get(key)) {
            return Ok(Some(cached));
        }

        self.hooks.on_query_begin();
        let found = state.dispatcher.get(key)?;
        self.hooks.on_query_completed(found.as_slice());

        if let (Some(cache), Some(model)) = (&state.cache, &found) {
            cache.insert_model(model);
        }
        Ok(found)
    }

    /// Runs `sql`; a cached result is served as is, empty lists included.
    pub fn query(&self, sql: &str) -> DataResult<Vec<E>> {
        let state = self.state()?;
        if let Some(cached) = state.cache.as_ref().and_then(|cache| cache.query(sql)) {
            return Ok(cached);
        }

        self.hooks.on_query_begin();
        let rows = state.dispatcher.query(sql)?;
        self.hooks.on_query_completed(&rows);

        if let Some(cache) = &state.cache {
            cache.insert_query_result(sql, &rows);
        }
        Ok(rows)
    }

    pub fn insert(&self, entity: &mut E) -> DataResult<usize> {
        let state = self.state()?;
        self.hooks.on_insert_begin(entity);
        let affected = state.dispatcher.insert(entity)?;
        self.hooks.on_insert_completed(entity);

        if let Some(cache) = &state.cache {
            cache.insert_model(entity);
            cache.remove_related(entity);
        }
        Ok(affected)
    }

    pub fn update(&self, entity: &mut E) -> DataResult<usize> {
        let state = self.state()?;
        self.hooks.on_update_begin(entity);
        let affected = state.dispatcher.update(entity)?;
        self.hooks.on_update_completed(entity);

        if let Some(cache) = &state.cache {
            if affected > 0 {
                cache.update(entity);
            } else {
                cache.remove(entity);
            }
        }
        Ok(affected)
    }

    pub fn delete(&self, entity: &E) -> DataResult<usize> {
        let state = self.state()?;
        self.hooks.on_delete_begin(entity);
        let affected = state.dispatcher.delete(entity)?;
        self.hooks.on_delete_completed(entity);

        if let Some(cache) = &state.cache {
            cache.remove(entity);
        }
        Ok(affected)
    }

    /// Rows whose `field` (name or column) equals `value`, via the type's
    /// "query by field" template.
    ///
    /// `value` is substituted literally; never pass untrusted text.
    pub fn query_by_field(&self, field: &str, value: &str) -> DataResult<Vec<E>> {
        let state = self.state()?;
        let column = state
            .descriptor
            .field(field)
            .map(|found| found.column().to_string())
            .ok_or_else(|| MappingError::UnknownField {
                entity: E::TYPE_NAME,
                field: field.to_string(),
            })?;
        let sql = state.descriptor.query_by_field_sql(&column, value);
        self.query(&sql)
    }

    pub fn query_all(&self) -> DataResult<Vec<E>> {
        let sql = self.state()?.descriptor.query_all_sql();
        self.query(&sql)
    }

    /// First row matching `field = value`.
    pub fn get_by_field(&self, field: &str, value: &str) -> DataResult<Option<E>> {
        Ok(self.query_by_field(field, value)?.into_iter().next())
    }

    /// Rows matching `field = value` that also satisfy `predicate`.
    pub fn find<P>(&self, field: &str, value: &str, predicate: P) -> DataResult<Vec<E>>
    where
        P: Fn(&E) -> bool,
    {
        let mut rows = self.query_by_field(field, value)?;
        rows.retain(|row| predicate(row));
        Ok(rows)
    }

    fn state(&self) -> DataResult<&PortalState<E>> {
        self.state.get_or_try_init(|| -> DataResult<PortalState<E>> {
            let descriptor = describe::<E>()?;
            let dispatcher = self.env.dispatcher::<E>()?;
            let cache = self
                .env
                .portal_cache(&descriptor, &dispatcher, &self.context);
            Ok(PortalState {
                descriptor,
                dispatcher,
                cache,
            })
        })
    }
}
