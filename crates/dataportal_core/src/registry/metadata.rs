//! Process-wide entity descriptor registry.
//!
//! # Invariants
//! - Concurrent first callers for one type build exactly one descriptor.
//! - Descriptors are never rebuilt or replaced once published.

use crate::model::entity::Entity;
use crate::model::MappingError;
use crate::registry::descriptor::EntityDescriptor;
use log::{error, info};
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type SharedDescriptor = Arc<dyn Any + Send + Sync>;

static GLOBAL_REGISTRY: Lazy<MetadataRegistry> = Lazy::new(MetadataRegistry::new);

/// Describes `E` through the process-wide registry.
pub fn describe<E: Entity>() -> Result<Arc<EntityDescriptor<E>>, MappingError> {
    GLOBAL_REGISTRY.describe::<E>()
}

/// Write-once-read-many store of entity descriptors keyed by type.
///
/// The process-wide instance backs [`describe`]; separate instances are
/// useful where a test needs an isolated build count.
pub struct MetadataRegistry {
    descriptors: RwLock<HashMap<TypeId, SharedDescriptor>>,
    build_locks: Mutex<HashMap<TypeId, Arc<Mutex<()>>>>,
    builds: AtomicUsize,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn global() -> &'static MetadataRegistry {
        &GLOBAL_REGISTRY
    }

    /// Returns the descriptor for `E`, building it on first use.
    ///
    /// Double-checked: the fast path takes a shared read lock; a miss takes a
    /// per-type build lock so other types are never blocked by this build.
    ///
    /// # Errors
    /// - Returns the mapping error when the descriptor cannot be built. Failed
    ///   builds are not cached.
    pub fn describe<E: Entity>(&self) -> Result<Arc<EntityDescriptor<E>>, MappingError> {
        if let Some(found) = self.lookup::<E>() {
            return Ok(found);
        }

        let type_lock = {
            let mut locks = self
                .build_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(TypeId::of::<E>()).or_default())
        };
        let _building = type_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(found) = self.lookup::<E>() {
            return Ok(found);
        }

        let descriptor = match EntityDescriptor::<E>::build() {
            Ok(descriptor) => Arc::new(descriptor),
            Err(err) => {
                error!(
                    "event=descriptor_build module=registry status=error entity={} error={}",
                    E::TYPE_NAME,
                    err
                );
                return Err(err);
            }
        };
        self.builds.fetch_add(1, Ordering::SeqCst);

        let shared: SharedDescriptor = descriptor.clone();
        self.descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<E>(), shared);

        info!(
            "event=descriptor_build module=registry status=ok entity={} table={} columns={} keyed={}",
            E::TYPE_NAME,
            descriptor.table(),
            descriptor.fields().len(),
            descriptor.primary_key().is_some()
        );
        Ok(descriptor)
    }

    /// Number of descriptors built by this registry.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn lookup<E: Entity>(&self) -> Option<Arc<EntityDescriptor<E>>> {
        let shared = self
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<E>())
            .cloned()?;
        shared.downcast::<EntityDescriptor<E>>().ok()
    }
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}
