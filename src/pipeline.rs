//! Pipeline composition: an immutable, reusable stack of strategies wrapped
//! around a user callback.

use crate::cache::CacheConfig;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerStrategy, CircuitHandle};
use crate::fallback::{FallbackConfig, FallbackStrategy};
use crate::hedging::{HedgingConfig, HedgingStrategy};
use crate::rate_limit::{RateLimiterConfig, RateLimiterStrategy};
use crate::retry::{RetryConfig, RetryStrategy};
use crate::strategy::{Next, Strategy};
use crate::timeout::{TimeoutConfig, TimeoutStrategy};
use crate::{CacheStrategy, Context, Outcome, PipelineError};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// An immutable ordered stack of strategies.
///
/// A pipeline is self-contained and reusable: it holds no per-invocation
/// state, and stateful strategies (circuit breaker, rate limiter, cache)
/// share their state across every invocation of the same pipeline instance.
///
/// Strategy order is the builder's insertion order, outermost first: with
/// `builder().retry(..).circuit_breaker(..)`, retry observes each breaker
/// verdict as a separate attempt.
pub struct Pipeline<T, E> {
    strategies: Arc<[Arc<dyn Strategy<T, E>>]>,
}

impl<T, E> Clone for Pipeline<T, E> {
    fn clone(&self) -> Self {
        Self { strategies: Arc::clone(&self.strategies) }
    }
}

impl<T, E> Pipeline<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn builder() -> PipelineBuilder<T, E> {
        PipelineBuilder::new()
    }

    /// Number of strategies in the stack.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run `op` through the stack with a fresh context. The terminal
    /// outcome's error is re-raised as the `Err` arm, original error intact.
    pub async fn execute<Op, Fut>(&self, op: Op) -> Result<T, PipelineError<E>>
    where
        Op: Fn(Arc<Context>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.execute_with(op, Arc::new(Context::new())).await
    }

    /// Run `op` through the stack with a caller-supplied context.
    pub async fn execute_with<Op, Fut>(
        &self,
        op: Op,
        ctx: Arc<Context>,
    ) -> Result<T, PipelineError<E>>
    where
        Op: Fn(Arc<Context>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.execute_and_capture_with(op, ctx).await.into_result()
    }

    /// Like [`Pipeline::execute`] but returns the raw [`Outcome`]; never
    /// fails on account of the wrapped work.
    pub async fn execute_and_capture<Op, Fut>(&self, op: Op) -> Outcome<T, E>
    where
        Op: Fn(Arc<Context>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.execute_and_capture_with(op, Arc::new(Context::new())).await
    }

    /// Outcome-returning variant of [`Pipeline::execute_with`].
    pub async fn execute_and_capture_with<Op, Fut>(
        &self,
        op: Op,
        ctx: Arc<Context>,
    ) -> Outcome<T, E>
    where
        Op: Fn(Arc<Context>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let callback =
            move |ctx: Arc<Context>| -> BoxFuture<'static, Result<T, E>> { Box::pin(op(ctx)) };
        Next::new(&self.strategies, &callback).run(ctx).await
    }
}

/// Accumulates strategies in insertion order and emits an immutable
/// [`Pipeline`]. An empty pipeline is legal and simply runs the callback.
pub struct PipelineBuilder<T, E> {
    strategies: Vec<Arc<dyn Strategy<T, E>>>,
}

impl<T, E> Default for PipelineBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> PipelineBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new() -> Self {
        Self { strategies: Vec::new() }
    }

    /// Append an arbitrary strategy. The escape hatch for user-defined
    /// policies.
    pub fn push(mut self, strategy: Arc<dyn Strategy<T, E>>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn retry(self, config: RetryConfig<T, E>) -> Self {
        self.push(Arc::new(RetryStrategy::new(config)))
    }

    pub fn timeout(self, config: TimeoutConfig) -> Self {
        self.push(Arc::new(TimeoutStrategy::new(config)))
    }

    pub fn circuit_breaker(self, config: CircuitBreakerConfig<T, E>) -> Self {
        self.push(Arc::new(CircuitBreakerStrategy::new(config)))
    }

    /// Append a circuit breaker and hand back the read/write handle scoped
    /// to it (current state, manual isolate/reset).
    pub fn circuit_breaker_with_handle(
        self,
        config: CircuitBreakerConfig<T, E>,
    ) -> (Self, CircuitHandle) {
        let strategy = CircuitBreakerStrategy::new(config);
        let handle = strategy.handle();
        (self.push(Arc::new(strategy)), handle)
    }

    pub fn fallback(self, config: FallbackConfig<T, E>) -> Self {
        self.push(Arc::new(FallbackStrategy::new(config)))
    }

    pub fn hedging(self, config: HedgingConfig<T, E>) -> Self {
        self.push(Arc::new(HedgingStrategy::new(config)))
    }

    pub fn rate_limit(self, config: RateLimiterConfig) -> Self {
        self.push(Arc::new(RateLimiterStrategy::new(config)))
    }

    pub fn cache(self, config: CacheConfig<T, E>) -> Self
    where
        T: Clone + Sync,
    {
        self.push(Arc::new(CacheStrategy::new(config)))
    }

    pub fn build(self) -> Pipeline<T, E> {
        Pipeline { strategies: self.strategies.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn empty_pipeline_runs_the_callback_once() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder().build();
        assert!(pipeline.is_empty());

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result = pipeline
            .execute(move |_ctx| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_reraises_the_original_error() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder().build();
        let result = pipeline
            .execute(|_ctx| async { Err(TestError("original".to_string())) })
            .await;

        match result.unwrap_err() {
            PipelineError::Inner(e) => assert_eq!(e.0, "original"),
            e => panic!("expected Inner, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn execute_and_capture_never_fails_for_wrapped_work() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder().build();
        let outcome = pipeline
            .execute_and_capture(|_ctx| async { Err(TestError("boom".to_string())) })
            .await;

        assert!(outcome.is_failure());
        assert!(outcome.error().unwrap().is_inner());
    }

    #[tokio::test]
    async fn caller_context_reaches_the_callback() {
        let pipeline: Pipeline<String, TestError> = Pipeline::builder().build();
        let ctx = Arc::new(Context::with_operation_key("lookup"));
        let result = pipeline
            .execute_with(
                |ctx| async move { Ok(ctx.operation_key().unwrap_or("none").to_string()) },
                ctx,
            )
            .await;

        assert_eq!(result.unwrap(), "lookup");
    }

    struct Outermost {
        seen: Arc<std::sync::Mutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    #[async_trait]
    impl Strategy<i32, TestError> for Outermost {
        async fn execute_core(
            &self,
            next: Next<'_, i32, TestError>,
            ctx: Arc<Context>,
        ) -> Outcome<i32, TestError> {
            self.seen.lock().unwrap().push(self.tag);
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn insertion_order_is_outermost_first() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .push(Arc::new(Outermost { seen: seen.clone(), tag: "a" }))
            .push(Arc::new(Outermost { seen: seen.clone(), tag: "b" }))
            .build();
        assert_eq!(pipeline.len(), 2);

        let _ = pipeline.execute(|_ctx| async { Ok(0) }).await;
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn pipeline_is_reusable_across_invocations() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder().build();
        for i in 0..3 {
            let result = pipeline.execute(move |_ctx| async move { Ok(i) }).await;
            assert_eq!(result.unwrap(), i);
        }
    }
}
