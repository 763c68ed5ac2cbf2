use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::utils::clock::Clock;

/// Composite call identity: endpoint plus its parameters, e.g.
/// `current_bid:8453:0xabc…:42`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new<P: AsRef<str>>(endpoint: &str, params: &[P]) -> Self {
        let mut key = endpoint.to_string();
        for param in params {
            key.push(':');
            key.push_str(param.as_ref());
        }
        CacheKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: u64,
    pub ttl_ms: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_valid(&self, now: u64) -> bool {
        now.saturating_sub(self.stored_at) < self.ttl_ms
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Share of lookups served from cache, 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Short-TTL memo of read results. Expired entries are evicted lazily when
/// looked up, or overwritten by the next `set`.
pub struct ResponseCache<V> {
    clock: Arc<dyn Clock>,
    entries: DashMap<CacheKey, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        ResponseCache {
            clock,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now_ms();

        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }

        if self.entries.remove_if(key, |_, entry| !entry.is_valid(now)).is_some() {
            tracing::trace!("Evicted expired cache entry {}", key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: CacheKey, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now_ms(),
            ttl_ms: ttl.as_millis() as u64,
        };
        self.entries.insert(key, entry);
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`, e.g. all reads for
    /// one token after a bid lands.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.as_str().starts_with(prefix));
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
        tracing::info!("Response cache cleared");
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
