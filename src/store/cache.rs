//! Result cache for store lookups
//!
//! Entries are only valid while the store is unchanged, so the store clears the cache
//! whenever a read or write lock is released.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: &'static str,
    key: String,
}

impl CacheKey {
    pub fn new(namespace: &'static str, key: impl Into<String>) -> Self {
        Self {
            namespace,
            key: key.into(),
        }
    }
}

type CachedValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<CacheKey, CachedValue>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &CacheKey) -> Option<Arc<T>> {
        let cached = self.entries.lock().get(key).cloned()?;
        match cached.downcast::<T>() {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(_) => None,
        }
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: CacheKey, value: Arc<T>) {
        self.entries.lock().insert(key, value);
    }

    /// Look `key` up, computing and caching the value on a miss.
    ///
    /// `compute` runs without the cache mutex held, so it may use the cache itself.
    pub fn get_or_try_insert_with<T, E>(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
    {
        if let Some(value) = self.get::<T>(&key) {
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(compute()?);
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            trace!("ResultCache: clearing {} entries", entries.len());
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
