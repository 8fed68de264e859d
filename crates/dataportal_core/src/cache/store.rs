//! Expiring key/value stores behind the cache coordinator.
//!
//! # Responsibility
//! - Define the store contract: get, bulk get, insert with TTL, remove.
//! - Provide the in-process default and a disabled store.
//! - Resolve stores by configured name.
//!
//! # Invariants
//! - Stores synchronize internally; callers never lock around them.
//! - Last write wins; an expired entry reads as absent.
//! - The in-process store drops an expired entry when it is read and sweeps
//!   every expired entry once per `SWEEP_INTERVAL` inserts.

use crate::config::ConfigError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MEMORY_STORE: &str = "memory";
pub const NULL_STORE: &str = "none";

const SWEEP_INTERVAL: u64 = 256;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache store `{store}` unavailable: {reason}")]
    Unavailable { store: String, reason: String },
    #[error("cache value encoding failed: {0}")]
    Encoding(String),
}

/// Usage counters reported by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently held, including expired ones not yet swept.
    pub entries: u64,
}

/// Generic expiring key/value store.
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Values aligned with `keys`; absent slots are `None`.
    fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    fn remove(&self, key: &str) -> CacheResult<()>;

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process expiring map; expired entries are dropped on read and by periodic sweeps.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        sweep(&mut entries, now)
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<Vec<u8>> {
        let (found, expired) = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => (Some(entry.value.clone()), false),
                Some(_) => (None, true),
                None => (None, false),
            }
        };
        if expired {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            // Re-check: a writer may have refreshed the key between the two locks.
            if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
                entries.remove(key);
            }
        }
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }
}

impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        MEMORY_STORE
    }

    fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.lookup(key, Instant::now()))
    }

    fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let now = Instant::now();
        Ok(keys.iter().map(|key| self.lookup(key, now)).collect())
    }

    fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.inserts.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            sweep(&mut entries, now);
        }
        if ttl.is_zero() {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries as u64,
        }
    }
}

fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before - entries.len()
}

/// Store that holds nothing; every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCacheStore;

impl CacheStore for NullCacheStore {
    fn name(&self) -> &str {
        NULL_STORE
    }

    fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn insert(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }
}

pub type StoreBuilder = Arc<dyn Fn() -> Arc<dyn CacheStore> + Send + Sync>;

/// Named store constructors selected by configuration.
#[derive(Clone)]
pub struct CacheStoreRegistry {
    builders: HashMap<String, StoreBuilder>,
}

impl CacheStoreRegistry {
    /// Registry with `memory` and `none`.
    pub fn new() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
        };
        registry.register(MEMORY_STORE, || -> Arc<dyn CacheStore> {
            Arc::new(MemoryCacheStore::new())
        });
        registry.register(NULL_STORE, || -> Arc<dyn CacheStore> { Arc::new(NullCacheStore) });
        registry
    }

    /// Registers or replaces a store constructor; names are case-insensitive.
    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn() -> Arc<dyn CacheStore> + Send + Sync + 'static,
    {
        self.builders
            .insert(name.trim().to_ascii_lowercase(), Arc::new(builder));
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn CacheStore>, ConfigError> {
        self.builders
            .get(&name.trim().to_ascii_lowercase())
            .map(|builder| builder())
            .ok_or_else(|| ConfigError::UnknownCacheStore(name.to_string()))
    }
}

impl Default for CacheStoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}
