//! # Named cache registry.
//!
//! Components register their in-memory caches by name; the controller clears
//! them on demand and lets the `maintain_memory` daemon trim them periodically.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// An in-memory cache owned by some component.
pub trait Cache: Send + Sync + 'static {
    /// Drops every entry.
    fn clear(&self);

    /// Periodic housekeeping (expire entries, shrink to budget). Defaults to nothing.
    fn maintain(&self) {}
}

/// Name → cache map.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<BTreeMap<String, Arc<dyn Cache>>>,
}

impl CacheRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `cache` under `name`, returning the cache it replaced.
    pub fn register(&self, name: impl Into<String>, cache: Arc<dyn Cache>) -> Option<Arc<dyn Cache>> {
        self.caches.write().insert(name.into(), cache)
    }

    /// Looks a cache up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.caches.read().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    /// Clears every cache.
    pub fn clear_all(&self) {
        for (name, cache) in self.snapshot() {
            debug!(cache = %name, "clearing cache");
            cache.clear();
        }
    }

    /// Runs housekeeping on every cache.
    pub fn maintain_all(&self) {
        for (_, cache) in self.snapshot() {
            cache.maintain();
        }
    }

    // Caches run outside the lock.
    fn snapshot(&self) -> Vec<(String, Arc<dyn Cache>)> {
        self.caches
            .read()
            .iter()
            .map(|(n, c)| (n.clone(), Arc::clone(c)))
            .collect()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("names", &self.names())
            .finish()
    }
}
