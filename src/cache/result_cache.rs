//! Extraction result cache with TTL expiry and LRU eviction.
//!
//! Keyed by document [`Fingerprint`]. Entries expire lazily: an entry older
//! than the TTL is removed when it is next read, never by a background sweep.
//! When the store is at capacity, inserting a new fingerprint evicts the
//! least-recently-used entry, where both hits and inserts count as use.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::fingerprint::Fingerprint;
use crate::config::CacheConfig;
use crate::extraction::ExtractionResult;

/// A single cached extraction.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: ExtractionResult,
    created_at: Instant,
    /// Access sequence number; larger means more recently used.
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheStore {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Monotonic access counter backing LRU order.
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheStore {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Bounded, time-expiring fingerprint → result store.
///
/// Thread-safe via an internal `Mutex`; every public operation is a single
/// critical section, so check-evict-insert in [`ResultCache::set`] is atomic.
#[derive(Debug)]
pub struct ResultCache {
    store: Mutex<CacheStore>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    /// Create a cache. `max_entries` is clamped to a minimum of 1.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            store: Mutex::new(CacheStore::default()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl())
    }

    /// Look up the cached result for a document.
    pub fn get(&self, document: &str) -> Option<ExtractionResult> {
        self.get_by_fingerprint(&Fingerprint::of(document))
    }

    /// Store a result for a document.
    pub fn set(&self, document: &str, result: ExtractionResult) {
        self.set_by_fingerprint(Fingerprint::of(document), result);
    }

    /// Look up by fingerprint. Returns `None` if absent or expired; an expired
    /// entry is removed. A hit marks the entry most-recently-used.
    pub fn get_by_fingerprint(&self, key: &Fingerprint) -> Option<ExtractionResult> {
        let now = Instant::now();
        let mut store = self.lock();

        let expired = store
            .entries
            .get(key)
            .map(|e| now.saturating_duration_since(e.created_at) >= self.ttl);
        match expired {
            Some(true) => {
                debug!(key = %key.short(), "Cache entry expired, removing");
                store.entries.remove(key);
                store.expirations += 1;
                store.misses += 1;
                None
            }
            Some(false) => {
                let tick = store.next_tick();
                store.hits += 1;
                let entry = store.entries.get_mut(key)?;
                entry.last_used = tick;
                debug!(key = %key.short(), "Cache HIT");
                Some(entry.payload.clone())
            }
            None => {
                debug!(key = %key.short(), "Cache MISS");
                store.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite by fingerprint, evicting the LRU entry first when
    /// the cache is full and the fingerprint is new.
    pub fn set_by_fingerprint(&self, key: Fingerprint, result: ExtractionResult) {
        let now = Instant::now();
        let mut store = self.lock();

        if !store.entries.contains_key(&key) && store.entries.len() >= self.max_entries {
            Self::evict_lru(&mut store);
        }
        let tick = store.next_tick();
        debug!(key = %key.short(), "Cached result");
        store.entries.insert(
            key,
            CacheEntry {
                payload: result,
                created_at: now,
                last_used: tick,
            },
        );
    }

    /// Return aggregate statistics about the cache.
    pub fn stats(&self) -> CacheStats {
        let store = self.lock();
        CacheStats {
            total_entries: store.entries.len(),
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            hits: store.hits,
            misses: store.misses,
            evictions: store.evictions,
            expirations: store.expirations,
        }
    }

    /// Remove all entries. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Number of entries physically present, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.lock().entries.contains_key(key)
    }

    // -- private helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, CacheStore> {
        // No invariant spans a panic point inside the critical sections.
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn evict_lru(store: &mut CacheStore) {
        if let Some(lru_key) = store
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        {
            debug!(key = %lru_key.short(), "Evicting LRU cache entry");
            store.entries.remove(&lru_key);
            store.evictions += 1;
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}
