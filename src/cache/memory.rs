//! In-memory reference cache provider: LRU-bounded with per-entry expiry
//! and an optional background sweep.

use super::{CacheError, CacheProvider, CachedValue};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Entry {
    value: CachedValue,
    created_at: Instant,
    last_accessed: Instant,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// LRU cache of type-erased values.
///
/// Reads touch their entry (most-recently-used last); writes replace any
/// existing entry and let the capacity bound evict the least-recently-used.
/// Expired entries are deleted on access; the optional sweep merely bounds
/// how long an unread expired entry can linger.
pub struct MemoryCache {
    entries: Arc<Mutex<LruCache<String, Entry>>>,
    default_ttl: Option<Duration>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("default_ttl", &self.default_ttl)
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}

impl Default for MemoryCache {
    /// A 1024-entry cache with no default TTL and no sweep.
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MemoryCache {
    /// A cache holding at most `max_entries` values (clamped to at least 1).
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            default_ttl: None,
            sweeper: None,
        }
    }

    /// Expiry applied when `set` is called without a TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Age (since creation) and idle time (since last access) of a live
    /// entry, without touching its recency.
    pub fn entry_age(&self, key: &str) -> Option<(Duration, Duration)> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.peek(key).map(|entry| (entry.created_at.elapsed(), entry.last_accessed.elapsed()))
    }

    /// Spawn a background task that evicts expired entries every
    /// `interval`. Optional for correctness (expiry is also enforced on
    /// read); it only bounds memory. Requires a tokio runtime; the task is
    /// aborted when the cache is dropped.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        if let Some(old) = self.sweeper.take() {
            old.abort();
        }
        let entries = Arc::clone(&self.entries);
        self.sweeper = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let now = Instant::now();
                let mut entries = entries.lock().unwrap_or_else(|p| p.into_inner());
                let expired: Vec<String> = entries
                    .iter()
                    .filter(|(_, entry)| entry.is_expired(now))
                    .map(|(key, _)| key.clone())
                    .collect();
                if !expired.is_empty() {
                    tracing::trace!(count = expired.len(), "cache sweep: evicting expired entries");
                }
                for key in expired {
                    entries.pop(&key);
                }
            }
        }));
        self
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        // get_mut moves the key to most-recently-used.
        let expired = match entries.get_mut(key) {
            Some(entry) => {
                if entry.is_expired(now) {
                    true
                } else {
                    entry.last_accessed = now;
                    return Ok(Some(Arc::clone(&entry.value)));
                }
            }
            None => return Ok(None),
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = ttl.or(self.default_ttl).and_then(|ttl| now.checked_add(ttl));
        let entry = Entry { value, created_at: now, last_accessed: now, expires_at };
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.push(key.to_owned(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).pop(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.entries.lock().unwrap_or_else(|p| p.into_inner()).len())
    }
}
