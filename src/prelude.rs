//! Convenient re-exports for common Lifeline types.
pub use crate::{
    Backoff, CacheConfig, CacheProvider, CancellationToken, CircuitBreakerConfig, CircuitHandle,
    CircuitState, Clock, Context, FallbackConfig, HedgingConfig, InstantSleeper, Jitter,
    MemoryCache, MeteredCache, MonotonicClock, Next, Outcome, OutcomePredicate, Pipeline,
    PipelineBuilder, PipelineError, RateLimiterConfig, RejectReason, RetryConfig, Sleeper,
    Strategy, TimeoutConfig, TokioSleeper, TrackingSleeper,
};
