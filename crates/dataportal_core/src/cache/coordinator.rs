//! Invalidating cache coordinator.
//!
//! # Responsibility
//! - Cache models, query results and relation back-links for one entity type.
//! - Invalidate every cached query an entity mutation could have made stale.
//!
//! # Invariants
//! - A query is served only while every model it lists is still cached.
//! - A relation entry lists each query key once.
//! - Store failures never reach the caller; they read as misses.

use crate::cache::keys::{CacheKeys, KeyScope};
use crate::cache::store::{CacheError, CacheResult, CacheStore};
use crate::model::entity::Entity;
use crate::registry::EntityDescriptor;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Keeps cached models, query results and relation back-links consistent.
///
/// Every public operation is best-effort: store failures are logged and
/// read as misses, never returned.
pub struct CacheCoordinator<E> {
    descriptor: Arc<EntityDescriptor<E>>,
    store: Arc<dyn CacheStore>,
    keys: CacheKeys,
    ttl: Duration,
}

impl<E> Clone for CacheCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
            ttl: self.ttl,
        }
    }
}

impl<E: Entity> CacheCoordinator<E> {
    pub fn new(
        descriptor: Arc<EntityDescriptor<E>>,
        store: Arc<dyn CacheStore>,
        scope: KeyScope,
        ttl: Duration,
    ) -> Self {
        Self {
            keys: CacheKeys::new(E::TYPE_NAME, scope),
            descriptor,
            store,
            ttl,
        }
    }

    /// Same store and TTL under another key scope.
    pub fn with_scope(&self, scope: KeyScope) -> Self {
        Self {
            keys: CacheKeys::new(E::TYPE_NAME, scope),
            ..self.clone()
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Cached model for `identity`, if any.
    pub fn get(&self, identity: &str) -> Option<E> {
        let key = self.keys.model(identity);
        let found = self.swallow("get", self.read::<E>(&key));
        debug!(
            "event=cache_get module=cache status={} entity={}",
            if found.is_some() { "hit" } else { "miss" },
            E::TYPE_NAME
        );
        found
    }

    /// Cached result list for `sql`.
    ///
    /// Returns `None` and purges the query key when any referenced model is
    /// no longer cached; a partial list is never returned.
    pub fn query(&self, sql: &str) -> Option<Vec<E>> {
        self.swallow("query", self.try_query(sql))
    }

    pub fn insert_model(&self, entity: &E) {
        let key = self.keys.model(&self.descriptor.identity(entity));
        self.swallow("insert_model", self.write(&key, entity).map(Some));
    }

    /// Caches `entities` as the result of `sql` and back-links each model.
    pub fn insert_query_result(&self, sql: &str, entities: &[E]) {
        self.swallow(
            "insert_query_result",
            self.try_insert_query_result(sql, entities).map(Some),
        );
    }

    /// Drops the model and every cached query that lists it.
    pub fn remove(&self, entity: &E) {
        self.swallow("remove", self.try_remove(entity).map(Some));
    }

    /// Drops list-shaped queries the entity could now belong to.
    ///
    /// Purges the type's "query all" result and each "query by field" result
    /// for the entity's current column values.
    pub fn remove_related(&self, entity: &E) {
        let mut statements = vec![self.descriptor.query_all_sql()];
        statements.extend(self.by_field_statements(entity));
        self.swallow("remove_related", self.remove_queries(&statements).map(Some));
    }

    /// Replaces the cached model and purges by-field queries for its new values.
    pub fn update(&self, entity: &E) {
        self.remove(entity);
        self.insert_model(entity);
        let statements = self.by_field_statements(entity);
        self.swallow("update", self.remove_queries(&statements).map(Some));
    }

    fn by_field_statements(&self, entity: &E) -> Vec<String> {
        self.descriptor
            .write_fields()
            .map(|field| {
                self.descriptor
                    .query_by_field_sql(field.column(), &field.read(entity).to_literal())
            })
            .collect()
    }

    fn try_query(&self, sql: &str) -> CacheResult<Option<Vec<E>>> {
        let query_key = self.keys.query(sql);
        let Some(model_keys) = self.read::<Vec<String>>(&query_key)? else {
            debug!(
                "event=cache_query module=cache status=miss entity={}",
                E::TYPE_NAME
            );
            return Ok(None);
        };

        let slots = self.store.get_many(&model_keys)?;
        let mut models = Vec::with_capacity(slots.len());
        for slot in slots {
            let decoded = slot.and_then(|bytes| serde_json::from_slice::<E>(&bytes).ok());
            match decoded {
                Some(model) => models.push(model),
                None => {
                    debug!(
                        "event=cache_query module=cache status=partial entity={} listed={}",
                        E::TYPE_NAME,
                        model_keys.len()
                    );
                    self.store.remove(&query_key)?;
                    return Ok(None);
                }
            }
        }
        debug!(
            "event=cache_query module=cache status=hit entity={} rows={}",
            E::TYPE_NAME,
            models.len()
        );
        Ok(Some(models))
    }

    fn try_insert_query_result(&self, sql: &str, entities: &[E]) -> CacheResult<()> {
        let query_key = self.keys.query(sql);
        let mut model_keys = Vec::with_capacity(entities.len());

        for entity in entities {
            let identity = self.descriptor.identity(entity);
            let model_key = self.keys.model(&identity);
            self.write(&model_key, entity)?;

            let relation_key = self.keys.relation(&identity);
            let mut linked = self.read::<Vec<String>>(&relation_key)?.unwrap_or_default();
            if !linked.contains(&query_key) {
                linked.push(query_key.clone());
            }
            self.write(&relation_key, &linked)?;
            model_keys.push(model_key);
        }

        self.write(&query_key, &model_keys)
    }

    fn try_remove(&self, entity: &E) -> CacheResult<()> {
        let identity = self.descriptor.identity(entity);
        self.store.remove(&self.keys.model(&identity))?;

        let relation_key = self.keys.relation(&identity);
        if let Some(linked) = self.read::<Vec<String>>(&relation_key)? {
            for query_key in &linked {
                self.store.remove(query_key)?;
            }
        }
        self.store.remove(&relation_key)
    }

    fn remove_queries(&self, statements: &[String]) -> CacheResult<()> {
        for sql in statements {
            self.store.remove(&self.keys.query(sql))?;
        }
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(
                    "event=cache_decode module=cache status=error entity={} error={}",
                    E::TYPE_NAME,
                    err
                );
                self.store.remove(key)?;
                Ok(None)
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|err| CacheError::Encoding(err.to_string()))?;
        self.store.insert(key, bytes, self.ttl)
    }

    fn swallow<T>(&self, operation: &str, result: CacheResult<Option<T>>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "event=cache_{operation} module=cache status=error entity={} store={} error={}",
                    E::TYPE_NAME,
                    self.store.name(),
                    err
                );
                None
            }
        }
    }
}
