//! Cache strategy: keyed memoization of successful outcomes in front of the
//! inner chain, with a pluggable provider.
//!
//! Caching is best-effort: a provider error on `get` reads as a miss, and a
//! provider error on `set` is swallowed so the fresh outcome still flows.

pub mod memory;
pub mod metrics;

use crate::strategy::{Next, Strategy};
use crate::{Context, Outcome, OutcomePredicate};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Type-erased cached value. Providers store values as `Arc<dyn Any>`; the
/// strategy downcasts on the way out and treats a mismatch as a miss.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Errors surfaced by cache providers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),
}

/// Storage backend for the cache strategy.
///
/// [`memory::MemoryCache`] is the in-process reference implementation;
/// [`metrics::MeteredCache`] decorates any provider with counters.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Look up a key. `Ok(None)` for a miss.
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError>;

    /// Store a value under a key, optionally bounded by a time-to-live.
    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Drop a key.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Drop everything.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Entry count, when the backend can report one cheaply.
    fn len(&self) -> Option<usize> {
        None
    }
}

/// Fired on cache hits, misses, and stores.
#[derive(Debug, Clone, Copy)]
pub struct CacheEvent<'a> {
    pub key: &'a str,
}

/// Configuration for [`CacheStrategy`].
pub struct CacheConfig<T, E> {
    provider: Arc<dyn CacheProvider>,
    key_generator: Option<Arc<dyn Fn(&Context) -> Option<String> + Send + Sync>>,
    should_cache: OutcomePredicate<T, E>,
    ttl: Option<Duration>,
    on_hit: Option<Arc<dyn Fn(&CacheEvent<'_>) + Send + Sync>>,
    on_miss: Option<Arc<dyn Fn(&CacheEvent<'_>) + Send + Sync>>,
    on_set: Option<Arc<dyn Fn(&CacheEvent<'_>) + Send + Sync>>,
}

impl<T, E> Clone for CacheConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            key_generator: self.key_generator.clone(),
            should_cache: self.should_cache.clone(),
            ttl: self.ttl,
            on_hit: self.on_hit.clone(),
            on_miss: self.on_miss.clone(),
            on_set: self.on_set.clone(),
        }
    }
}

impl<T: 'static, E: 'static> CacheConfig<T, E> {
    /// Cache through `provider`, keyed by the context's operation key.
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            provider,
            key_generator: None,
            should_cache: OutcomePredicate::successes(),
            ttl: None,
            on_hit: None,
            on_miss: None,
            on_set: None,
        }
    }

    /// Derive the key from the context instead of the operation key.
    /// Returning `None` (or an empty string) bypasses the cache.
    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Context) -> Option<String> + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    /// Which outcomes are worth storing. Defaults to successes.
    pub fn should_cache(mut self, predicate: OutcomePredicate<T, E>) -> Self {
        self.should_cache = predicate;
        self
    }

    /// Time-to-live for stored entries.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn on_hit<F>(mut self, observer: F) -> Self
    where
        F: Fn(&CacheEvent<'_>) + Send + Sync + 'static,
    {
        self.on_hit = Some(Arc::new(observer));
        self
    }

    pub fn on_miss<F>(mut self, observer: F) -> Self
    where
        F: Fn(&CacheEvent<'_>) + Send + Sync + 'static,
    {
        self.on_miss = Some(Arc::new(observer));
        self
    }

    pub fn on_set<F>(mut self, observer: F) -> Self
    where
        F: Fn(&CacheEvent<'_>) + Send + Sync + 'static,
    {
        self.on_set = Some(Arc::new(observer));
        self
    }
}

/// Strategy that serves repeat invocations from a cache.
pub struct CacheStrategy<T, E> {
    config: CacheConfig<T, E>,
}

impl<T, E> CacheStrategy<T, E> {
    pub fn new(config: CacheConfig<T, E>) -> Self {
        Self { config }
    }

    fn key_for(&self, ctx: &Context) -> Option<String> {
        let key = match &self.config.key_generator {
            Some(generator) => generator(ctx),
            None => ctx.operation_key().map(str::to_owned),
        };
        key.filter(|k| !k.is_empty())
    }
}

#[async_trait]
impl<T, E> Strategy<T, E> for CacheStrategy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E> {
        let key = match self.key_for(&ctx) {
            Some(key) => key,
            // No key, no caching.
            None => return next.run(ctx).await,
        };

        match self.config.provider.get(&key).await {
            Ok(Some(value)) => match value.downcast::<T>() {
                Ok(value) => {
                    tracing::trace!(key = %key, "cache hit");
                    if let Some(observer) = &self.config.on_hit {
                        observer(&CacheEvent { key: &key });
                    }
                    return Outcome::Success((*value).clone());
                }
                // A value of the wrong type under our key reads as a miss.
                Err(_) => tracing::debug!(key = %key, "cached value has unexpected type"),
            },
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "cache get failed; treating as miss");
            }
        }

        tracing::trace!(key = %key, "cache miss");
        if let Some(observer) = &self.config.on_miss {
            observer(&CacheEvent { key: &key });
        }

        let outcome = next.run(ctx).await;

        if self.config.should_cache.matches(&outcome) {
            if let Outcome::Success(value) = &outcome {
                let stored: CachedValue = Arc::new(value.clone());
                match self.config.provider.set(&key, stored, self.config.ttl).await {
                    Ok(()) => {
                        if let Some(observer) = &self.config.on_set {
                            observer(&CacheEvent { key: &key });
                        }
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "cache set failed; ignoring");
                    }
                }
            }
        }
        outcome
    }
}
