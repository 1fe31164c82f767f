//! Timeout strategy: races the inner chain against a deadline.
//!
//! The deadline propagates by cancellation, not interruption: on expiry the
//! strategy trips the latch of a forked inner context and returns at once.
//! The inner future is dropped, so cancellation-unsafe work may leave
//! partial state; prefer cancellation-safe primitives where that matters.

use crate::strategy::{Next, Strategy};
use crate::{Context, Outcome, PipelineError, Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Maximum allowed timeout (30 days), guarding accidental `u64::MAX`-style
/// deadlines while permitting long jobs.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Errors returned when configuring timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    /// Duration must be greater than zero.
    #[error("timeout duration must be > 0")]
    ZeroDuration,
    /// Duration exceeded the configured maximum.
    #[error("timeout duration {requested:?} exceeds maximum allowed {limit:?}")]
    ExceedsMaximum { requested: Duration, limit: Duration },
}

/// Configuration for [`TimeoutStrategy`].
#[derive(Clone)]
pub struct TimeoutConfig {
    timeout: Duration,
    generator: Option<Arc<dyn Fn(&Context) -> Duration + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for TimeoutConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutConfig")
            .field("timeout", &self.timeout)
            .field("generator", &self.generator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl TimeoutConfig {
    /// Creates a timeout configuration with the specified deadline.
    ///
    /// # Errors
    ///
    /// [`TimeoutError::ZeroDuration`] if `timeout` is zero,
    /// [`TimeoutError::ExceedsMaximum`] if it exceeds [`MAX_TIMEOUT`].
    pub fn new(timeout: Duration) -> Result<Self, TimeoutError> {
        if timeout.is_zero() {
            return Err(TimeoutError::ZeroDuration);
        }
        if timeout > MAX_TIMEOUT {
            return Err(TimeoutError::ExceedsMaximum { requested: timeout, limit: MAX_TIMEOUT });
        }
        Ok(Self { timeout, generator: None, sleeper: Arc::new(TokioSleeper) })
    }

    /// Derive the deadline from the context, consulted once per invocation.
    /// The configured `timeout` becomes the fallback for a zero result.
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Context) -> Duration + Send + Sync + 'static,
    {
        self.generator = Some(Arc::new(generator));
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// The configured deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Strategy that bounds the inner chain's duration.
#[derive(Debug, Clone)]
pub struct TimeoutStrategy {
    config: TimeoutConfig,
}

impl TimeoutStrategy {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl<T, E> Strategy<T, E> for TimeoutStrategy
where
    T: Send + 'static,
    E: Send + 'static,
{
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E> {
        let timeout = match &self.config.generator {
            Some(generator) => {
                let derived = generator(&ctx);
                if derived.is_zero() {
                    self.config.timeout
                } else {
                    derived
                }
            }
            None => self.config.timeout,
        };

        // The fork is what the inner work observes; tripping it on expiry
        // leaves the caller's own latch untouched.
        let inner_ctx = Arc::new(ctx.fork());

        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => {
                inner_ctx.cancel();
                Outcome::Failure(PipelineError::Cancelled)
            }
            outcome = next.run(inner_ctx.clone()) => outcome,
            _ = self.config.sleeper.sleep(timeout) => {
                inner_ctx.cancel();
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "timeout elapsed");
                Outcome::Failure(PipelineError::Timeout { timeout })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pipeline;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn config_rejects_zero_and_oversized_durations() {
        assert_eq!(TimeoutConfig::new(Duration::ZERO).unwrap_err(), TimeoutError::ZeroDuration);

        let oversized = MAX_TIMEOUT + Duration::from_secs(1);
        assert!(matches!(
            TimeoutConfig::new(oversized).unwrap_err(),
            TimeoutError::ExceedsMaximum { .. }
        ));

        assert!(TimeoutConfig::new(Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn fast_operations_pass_through_untouched() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .timeout(TimeoutConfig::new(Duration::from_millis(200)).unwrap())
            .build();

        let result = pipeline.execute(|_ctx| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_operations_are_rejected_at_the_deadline() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .timeout(TimeoutConfig::new(Duration::from_millis(50)).unwrap())
            .build();

        let start = Instant::now();
        let result = pipeline
            .execute(|_ctx| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(42)
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_millis(400), "returned well before the work");
        match err {
            PipelineError::Timeout { timeout } => {
                assert_eq!(timeout, Duration::from_millis(50));
            }
            e => panic!("expected Timeout, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn expiry_trips_the_inner_latch() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .timeout(TimeoutConfig::new(Duration::from_millis(50)).unwrap())
            .build();

        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = observed.clone();
        let result = pipeline
            .execute(move |ctx| {
                let observed = observed_clone.clone();
                async move {
                    ctx.cancellation().cancelled().await;
                    observed.store(true, Ordering::SeqCst);
                    Err::<i32, _>(TestError("unwound".to_string()))
                }
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        // The inner future was dropped at the deadline; its latch tripped but
        // the post-await code never ran.
        assert!(!observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn inner_errors_are_forwarded_unmodified() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .timeout(TimeoutConfig::new(Duration::from_millis(200)).unwrap())
            .build();

        let result = pipeline
            .execute(|_ctx| async { Err::<i32, _>(TestError("inner".to_string())) })
            .await;

        match result.unwrap_err() {
            PipelineError::Inner(e) => assert_eq!(e.0, "inner"),
            e => panic!("expected Inner, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn generator_derives_the_deadline_from_the_context() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .timeout(
                TimeoutConfig::new(Duration::from_secs(5))
                    .unwrap()
                    .with_generator(|ctx| match ctx.get_property::<u64>("deadline_ms") {
                        Some(ms) => Duration::from_millis(*ms),
                        None => Duration::ZERO,
                    }),
            )
            .build();

        let ctx = Arc::new(Context::new());
        ctx.set_property("deadline_ms", 50u64);

        let start = Instant::now();
        let result = pipeline
            .execute_with(
                |_ctx| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(1)
                },
                ctx,
            )
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn outer_cancellation_wins_over_the_timer() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .timeout(TimeoutConfig::new(Duration::from_secs(5)).unwrap())
            .build();

        let ctx = Arc::new(Context::new());
        let ctx_clone = ctx.clone();
        let handle = tokio::spawn(async move {
            pipeline
                .execute_with(
                    |_ctx| async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(1)
                    },
                    ctx_clone,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();

        let result = handle.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }
}
