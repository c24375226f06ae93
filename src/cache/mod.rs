//! Response cache.
//!
//! Responses are stored as JSON values keyed by a [`RequestFingerprint`]. The
//! store is a trait so that a shared external cache can back several gateway
//! instances; [`MemoryCache`] is the in-process implementation, built on `moka`.

mod fingerprint;

pub use fingerprint::{FingerprintBuilder, RequestFingerprint};
pub(crate) use fingerprint::normalize_member;

use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Storage for cached provider responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value if present and unexpired.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores a value for `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration);

    /// Removes a value.
    async fn remove(&self, key: &str);

    /// Number of stored entries.
    async fn len(&self) -> usize;

    /// Removes everything.
    async fn clear(&self);

    /// Returns true if the store is empty.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Clone)]
struct TimedValue {
    value: Arc<Value>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with.
struct PerEntryTtl;

impl Expiry<String, TimedValue> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &TimedValue, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &TimedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads that found a valid entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed to respect the size bound.
    pub evictions: u64,
}

/// In-memory cache with per-entry TTL and a size bound, backed by `moka`.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, TimedValue>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl MemoryCache {
    /// Creates a cache holding at most `max_entries` values.
    pub fn new(max_entries: usize) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let listener_evictions = Arc::clone(&evictions);

        let entries: Cache<String, TimedValue> = Cache::builder()
            .max_capacity(u64::try_from(max_entries.max(1)).unwrap_or(u64::MAX))
            .expire_after(PerEntryTtl)
            .eviction_listener(move |_key, _value, cause: RemovalCause| {
                if cause == RemovalCause::Size {
                    listener_evictions.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();

        Self {
            entries,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions,
        }
    }

    /// Returns the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Applies pending evictions and expirations.
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.entries.entry_count())
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        match self.entries.get(key).await {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some((*entry.value).clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = TimedValue {
            value: Arc::new(value),
            ttl,
        };
        self.entries.insert(key.to_string(), entry).await;
    }

    async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    async fn len(&self) -> usize {
        self.entries.run_pending_tasks().await;
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }
}
