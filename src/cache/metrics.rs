//! Counting decorator for cache providers: hits, misses, sets, and
//! accumulated provider latency.

use super::{CacheError, CacheProvider, CachedValue};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time counters read off a [`MeteredCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Total time spent inside the wrapped provider's `get`.
    pub get_time: Duration,
    /// Total time spent inside the wrapped provider's `set`.
    pub set_time: Duration,
}

impl CacheStats {
    /// Hits over lookups, 0.0 when nothing has been looked up yet.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Wraps any provider and counts its traffic. Lookup errors count as
/// misses, mirroring how the cache strategy treats them.
#[derive(Debug)]
pub struct MeteredCache<P> {
    inner: P,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    get_nanos: AtomicU64,
    set_nanos: AtomicU64,
}

impl<P> MeteredCache<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            get_nanos: AtomicU64::new(0),
            set_nanos: AtomicU64::new(0),
        }
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            get_time: Duration::from_nanos(self.get_nanos.load(Ordering::Relaxed)),
            set_time: Duration::from_nanos(self.set_nanos.load(Ordering::Relaxed)),
        }
    }
}

#[async_trait]
impl<P: CacheProvider> CacheProvider for MeteredCache<P> {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let start = Instant::now();
        let result = self.inner.get(key).await;
        self.get_nanos.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        match &result {
            Ok(Some(_)) => self.hits.fetch_add(1, Ordering::Relaxed),
            _ => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let start = Instant::now();
        let result = self.inner.set(key, value, ttl).await;
        self.set_nanos.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        if result.is_ok() {
            self.sets.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }

    fn len(&self) -> Option<usize> {
        self.inner.len()
    }
}
