// Bounded result cache keyed by the query fingerprint.
//
// The orchestrator only sees the `SuggestionCache` trait; `LruSuggestionCache`
// is the production implementation and `NoopCache` stands in when caching is
// disabled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::debug;

use crate::config::CacheConfig;
use crate::suggestion::SuggestionResult;

pub trait SuggestionCache: Send + Sync {
    fn get(&self, key: &str) -> Option<SuggestionResult>;
    fn put(&self, key: String, value: SuggestionResult);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the cache described by the config: LRU when enabled, no-op otherwise.
pub fn from_config(config: &CacheConfig) -> Arc<dyn SuggestionCache> {
    if config.enabled {
        Arc::new(LruSuggestionCache::new(config.max_size))
    } else {
        Arc::new(NoopCache)
    }
}

// ---------------------------------------------------------------------------
// LruSuggestionCache
// ---------------------------------------------------------------------------

/// Thread-safe LRU map. When a new key arrives at capacity, the least
/// recently used half of the entries is dropped in one pass.
pub struct LruSuggestionCache {
    entries: Mutex<LruCache<String, SuggestionResult>>,
    capacity: usize,
}

impl LruSuggestionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave a half-written entry, so a
    // poisoned map is still usable.
    fn entries(&self) -> MutexGuard<'_, LruCache<String, SuggestionResult>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SuggestionCache for LruSuggestionCache {
    fn get(&self, key: &str) -> Option<SuggestionResult> {
        self.entries().get(key).cloned()
    }

    fn put(&self, key: String, value: SuggestionResult) {
        let mut entries = self.entries();
        if !entries.contains(&key) && entries.len() >= self.capacity {
            let keep = self.capacity / 2;
            let before = entries.len();
            while entries.len() > keep {
                entries.pop_lru();
            }
            debug!(evicted = before - entries.len(), "suggestion cache full, evicted");
        }
        entries.put(key, value);
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

// ---------------------------------------------------------------------------
// NoopCache
// ---------------------------------------------------------------------------

/// Never stores anything.
pub struct NoopCache;

impl SuggestionCache for NoopCache {
    fn get(&self, _key: &str) -> Option<SuggestionResult> {
        None
    }

    fn put(&self, _key: String, _value: SuggestionResult) {}

    fn len(&self) -> usize {
        0
    }
}
