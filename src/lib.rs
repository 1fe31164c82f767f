#![forbid(unsafe_code)]

//! # Lifeline
//!
//! Composable resilience pipelines for async Rust: retry, timeout, circuit
//! breaker, fallback, hedging, rate limiting, and caching.
//!
//! ## Features
//!
//! - **Pipelines**: an immutable, reusable stack of strategies wrapped
//!   around a fallible async callback, composed in builder order
//! - **Outcome propagation**: every strategy inspects results on the return
//!   path and may forward, replace, retry, or race them
//! - **Execution context**: per-invocation operation key, attempt counter,
//!   typed property bag, and a one-shot cancellation latch observed at every
//!   suspension point
//! - **Deterministic tests**: pluggable clocks and sleepers throughout
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::{Backoff, Pipeline, PipelineError, RetryConfig, TimeoutConfig};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct FetchError;
//! # impl std::fmt::Display for FetchError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//! #         write!(f, "fetch failed")
//! #     }
//! # }
//! # impl std::error::Error for FetchError {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError<FetchError>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     // Retry wraps timeout: each timed-out attempt is retried.
//!     let pipeline: Pipeline<String, FetchError> = Pipeline::builder()
//!         .retry(
//!             RetryConfig::builder()
//!                 .max_attempts(3)
//!                 .backoff(Backoff::exponential(Duration::from_millis(50)))
//!                 .use_jitter()
//!                 .build(),
//!         )
//!         .timeout(TimeoutConfig::new(Duration::from_secs(2)).expect("valid timeout"))
//!         .build();
//!
//!     let result = pipeline
//!         .execute(move |_ctx| {
//!             let attempts = attempts.clone();
//!             async move {
//!                 if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
//!                     Err(FetchError)
//!                 } else {
//!                     Ok("ok".to_string())
//!                 }
//!             }
//!         })
//!         .await?;
//!
//!     assert_eq!(result, "ok");
//!     Ok(())
//! }
//! ```

mod backoff;
pub mod cache;
mod circuit_breaker;
mod clock;
mod context;
mod error;
mod fallback;
mod hedging;
mod jitter;
mod outcome;
mod pipeline;
mod predicate;
mod rate_limit;
mod retry;
mod sleeper;
mod strategy;
mod timeout;

// Re-exports
pub use backoff::Backoff;
pub use cache::memory::MemoryCache;
pub use cache::metrics::{CacheStats, MeteredCache};
pub use cache::{CacheConfig, CacheError, CacheEvent, CacheProvider, CacheStrategy, CachedValue};
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerStrategy, CircuitConfigError,
    CircuitHandle, CircuitState, OpenedEvent,
};
pub use clock::{Clock, MonotonicClock};
pub use context::{CancellationToken, Context};
pub use error::{PipelineError, RejectReason};
pub use fallback::{FallbackConfig, FallbackStrategy};
pub use hedging::{HedgeEvent, HedgingConfig, HedgingConfigBuilder, HedgingStrategy};
pub use jitter::Jitter;
pub use outcome::Outcome;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use predicate::OutcomePredicate;
pub use rate_limit::{
    RateLimitEvent, RateLimiterConfig, RateLimiterConfigError, RateLimiterStrategy,
};
pub use retry::{RetryConfig, RetryConfigBuilder, RetryEvent, RetryStrategy};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use strategy::{Next, Strategy};
pub use timeout::{TimeoutConfig, TimeoutError, TimeoutStrategy, MAX_TIMEOUT};

pub mod prelude;
