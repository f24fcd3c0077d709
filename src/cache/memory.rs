use crate::cache::{entry_cost, ByteView, CacheStats};
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Cost-aware LRU cache of [`ByteView`]s.
///
/// The total cost of all entries never exceeds `max_size_bytes` once an insert
/// returns, unless the budget is zero (unbounded). Expired entries are reported
/// as misses but stay resident until LRU pressure or an explicit removal.
pub struct LruMemoryCache {
    inner: Mutex<Inner>,
    max_size_bytes: usize,
    stats: CacheStatsInner,
}

struct Inner {
    entries: LruCache<String, ByteView>,
    current_size: usize,
}

struct CacheStatsInner {
    gets: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl LruMemoryCache {
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                current_size: 0,
            }),
            max_size_bytes,
            stats: CacheStatsInner {
                gets: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            },
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.get_at(key, SystemTime::now())
    }

    /// Lookup evaluating expiration against `now`.
    pub fn get_at(&self, key: &str, now: SystemTime) -> Option<ByteView> {
        self.stats.gets.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        match inner.entries.peek(key) {
            Some(view) if view.is_expired_at(now) => return None,
            Some(_) => {}
            None => return None,
        }

        let view = inner.entries.get(key).cloned();
        if view.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        view
    }

    pub fn add(&self, key: &str, value: ByteView) {
        let cost = entry_cost(key, &value);

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.put(key.to_string(), value) {
            inner.current_size -= entry_cost(key, &previous);
        }
        inner.current_size += cost;

        if self.max_size_bytes == 0 {
            return;
        }
        while inner.current_size > self.max_size_bytes {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.current_size -= entry_cost(&evicted_key, &evicted);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key = %evicted_key, "evicted cache entry");
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<ByteView> {
        let mut inner = self.inner.lock();
        let removed = inner.entries.pop(key);
        if let Some(view) = &removed {
            inner.current_size -= entry_cost(key, view);
        }
        removed
    }

    /// Evict the least recently used entry, counting it as an eviction.
    pub fn remove_oldest(&self) -> Option<(String, ByteView)> {
        let mut inner = self.inner.lock();
        let (key, view) = inner.entries.pop_lru()?;
        inner.current_size -= entry_cost(&key, &view);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        Some((key, view))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_size = 0;
    }

    /// Current total cost in bytes.
    pub fn size(&self) -> usize {
        self.inner.lock().current_size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();

        CacheStats {
            bytes: inner.current_size,
            items: inner.entries.len(),
            gets: self.stats.gets.load(Ordering::Relaxed),
            hits: self.stats.hits.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }
}
