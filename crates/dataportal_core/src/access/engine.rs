//! Data access engine: relational mapper fronted by the invalidating cache.
//!
//! # Responsibility
//! - Serve reads from cache, falling back to storage and populating on success.
//! - Apply writes to storage first, then refresh or invalidate cached entries.
//!
//! # Invariants
//! - Cache mutation never precedes a successful authoritative write.
//! - A failed write leaves the cache and the caller's entity stamps untouched.

use crate::cache::CacheCoordinator;
use crate::db::{ConnectionFactory, ConnectionScope};
use crate::error::{DataError, DataResult};
use crate::mapper::RelationalMapper;
use crate::model::entity::{now_millis, Entity};
use crate::registry::EntityDescriptor;
use log::{debug, error};
use std::sync::Arc;

/// Per-type CRUD with cache-first reads and cache-after-write mutations.
///
/// Each call acquires its own connection and releases it on every exit path.
pub struct DataAccess<E> {
    mapper: RelationalMapper<E>,
    connections: Arc<dyn ConnectionFactory>,
    cache: Option<CacheCoordinator<E>>,
}

impl<E: Entity> DataAccess<E> {
    pub fn new(
        descriptor: Arc<EntityDescriptor<E>>,
        connections: Arc<dyn ConnectionFactory>,
        cache: Option<CacheCoordinator<E>>,
    ) -> Self {
        Self {
            mapper: RelationalMapper::new(descriptor),
            connections,
            cache,
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor<E>> {
        self.mapper.descriptor()
    }

    /// Active cache tier, `None` when caching is off for this type.
    pub fn cache(&self) -> Option<&CacheCoordinator<E>> {
        self.cache.as_ref()
    }

    /// Reads by primary key text: cache first, then storage.
    ///
    /// # Errors
    /// - `Unsupported` when the type has no primary key.
    pub fn get(&self, key: &str) -> DataResult<Option<E>> {
        let descriptor = self.descriptor();
        if descriptor.primary_key().is_none() {
            return Err(DataError::unsupported("get", E::TYPE_NAME));
        }
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(key)) {
            return Ok(Some(cached));
        }

        let key_value = descriptor.key_value(key);
        let found = self.logged("get", |engine| {
            let mut scope = ConnectionScope::acquire(engine.connections.as_ref())?;
            engine.mapper.get(scope.connection(), &key_value)
        })?;

        if let (Some(cache), Some(model)) = (&self.cache, &found) {
            cache.insert_model(model);
        }
        Ok(found)
    }

    /// Runs `sql`; an empty cached result is re-fetched from storage.
    pub fn query(&self, sql: &str) -> DataResult<Vec<E>> {
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.query(sql)) {
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let rows = self.logged("query", |engine| {
            let mut scope = ConnectionScope::acquire(engine.connections.as_ref())?;
            engine.mapper.query(scope.connection(), sql)
        })?;

        if let Some(cache) = &self.cache {
            cache.insert_query_result(sql, &rows);
        }
        Ok(rows)
    }

    /// Inserts, then caches the model and drops list-shaped queries.
    pub fn insert(&self, entity: &mut E) -> DataResult<usize> {
        let affected = self.logged("insert", |engine| {
            let mut scope = ConnectionScope::acquire(engine.connections.as_ref())?;
            engine.mapper.insert(scope.connection(), entity)
        })?;

        if let Some(cache) = &self.cache {
            cache.insert_model(entity);
            cache.remove_related(entity);
        }
        Ok(affected)
    }

    /// Stamps `UpdateTime`, writes, then refreshes the cached model.
    ///
    /// When no row matched, the model is dropped from cache instead so the
    /// cache never holds values that were not persisted. A failed write
    /// restores the caller's previous `UpdateTime`.
    pub fn update(&self, entity: &mut E) -> DataResult<usize> {
        let previous = entity.update_time();
        entity.set_update_time(now_millis());
        let written = self.logged("update", |engine| {
            let mut scope = ConnectionScope::acquire(engine.connections.as_ref())?;
            engine.mapper.update(scope.connection(), entity)
        });
        let affected = match written {
            Ok(affected) => affected,
            Err(err) => {
                entity.set_update_time(previous);
                return Err(err);
            }
        };

        if let Some(cache) = &self.cache {
            if affected > 0 {
                cache.update(entity);
            } else {
                cache.remove(entity);
            }
        }
        Ok(affected)
    }

    pub fn delete(&self, entity: &E) -> DataResult<usize> {
        let affected = self.logged("delete", |engine| {
            let mut scope = ConnectionScope::acquire(engine.connections.as_ref())?;
            engine.mapper.delete(scope.connection(), entity)
        })?;

        if let Some(cache) = &self.cache {
            cache.remove(entity);
            cache.remove_related(entity);
        }
        Ok(affected)
    }

    fn logged<T>(
        &self,
        operation: &str,
        run: impl FnOnce(&Self) -> DataResult<T>,
    ) -> DataResult<T> {
        match run(self) {
            Ok(value) => {
                debug!(
                    "event=data_{operation} module=access status=ok entity={}",
                    E::TYPE_NAME
                );
                Ok(value)
            }
            Err(err) => {
                error!(
                    "event=data_{operation} module=access status=error entity={} error_kind={} error={}",
                    E::TYPE_NAME,
                    err.kind(),
                    err
                );
                Err(err)
            }
        }
    }
}
