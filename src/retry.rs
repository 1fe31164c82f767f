//! Retry strategy: an attempt loop with backoff, jitter, and a handled-outcome
//! predicate, plus a pluggable sleeper for deterministic tests.

use crate::strategy::{Next, Strategy};
use crate::{Backoff, Context, Jitter, Outcome, OutcomePredicate, PipelineError, Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Fired once per retry, before the inter-attempt sleep.
pub struct RetryEvent<'a, T, E> {
    /// Zero-based index of the attempt that just completed.
    pub attempt: u32,
    /// The handled outcome that triggered the retry.
    pub outcome: &'a Outcome<T, E>,
    /// The delay about to be slept.
    pub delay: Duration,
}

/// Configuration for [`RetryStrategy`].
///
/// `max_attempts` counts *retries*: the callback runs `max_attempts + 1`
/// times in the worst case, and 0 disables retrying entirely.
pub struct RetryConfig<T, E> {
    max_attempts: u32,
    backoff: Backoff,
    max_delay: Option<Duration>,
    jitter: Jitter,
    should_handle: OutcomePredicate<T, E>,
    delay_generator: Option<Arc<dyn Fn(u32, &Outcome<T, E>) -> Option<Duration> + Send + Sync>>,
    on_retry: Option<Arc<dyn Fn(&RetryEvent<'_, T, E>) + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T, E> Clone for RetryConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            max_delay: self.max_delay,
            jitter: self.jitter.clone(),
            should_handle: self.should_handle.clone(),
            delay_generator: self.delay_generator.clone(),
            on_retry: self.on_retry.clone(),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<T, E> std::fmt::Debug for RetryConfig<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl<T: 'static, E: 'static> Default for RetryConfig<T, E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            max_delay: None,
            jitter: Jitter::None,
            should_handle: OutcomePredicate::failures(),
            delay_generator: None,
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl<T: 'static, E: 'static> RetryConfig<T, E> {
    pub fn builder() -> RetryConfigBuilder<T, E> {
        RetryConfigBuilder::new()
    }
}

/// Builder for [`RetryConfig`].
pub struct RetryConfigBuilder<T, E> {
    config: RetryConfig<T, E>,
}

impl<T: 'static, E: 'static> Default for RetryConfigBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> RetryConfigBuilder<T, E> {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Number of retries after the initial attempt. 0 disables retrying.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Clamp every computed delay, whatever the backoff curve.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.config.max_delay = Some(max);
        self
    }

    /// Randomize delays within ±20% of the computed value.
    pub fn use_jitter(mut self) -> Self {
        self.config.jitter = Jitter::standard();
        self
    }

    /// Randomize delays with a specific jitter strategy.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Which outcomes are retried. Defaults to every failure.
    pub fn should_handle(mut self, predicate: OutcomePredicate<T, E>) -> Self {
        self.config.should_handle = predicate;
        self
    }

    /// Override the computed delay. Returning `None` falls back to the
    /// backoff formula for that attempt.
    pub fn delay_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(u32, &Outcome<T, E>) -> Option<Duration> + Send + Sync + 'static,
    {
        self.config.delay_generator = Some(Arc::new(generator));
        self
    }

    /// Observe retries. Runs before the inter-attempt sleep.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RetryEvent<'_, T, E>) + Send + Sync + 'static,
    {
        self.config.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.config.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryConfig<T, E> {
        self.config
    }
}

/// Strategy that re-runs the inner chain while outcomes stay handled.
pub struct RetryStrategy<T, E> {
    config: RetryConfig<T, E>,
}

impl<T, E> RetryStrategy<T, E> {
    pub fn new(config: RetryConfig<T, E>) -> Self {
        Self { config }
    }

    fn delay_for(&self, attempt: u32, outcome: &Outcome<T, E>) -> Duration {
        if let Some(generator) = &self.config.delay_generator {
            if let Some(delay) = generator(attempt, outcome) {
                return delay;
            }
        }
        let mut delay = self.config.backoff.delay(attempt);
        if let Some(max) = self.config.max_delay {
            delay = delay.min(max);
        }
        self.config.jitter.apply(delay)
    }
}

#[async_trait]
impl<T, E> Strategy<T, E> for RetryStrategy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E> {
        let mut attempt: u32 = 0;
        loop {
            let outcome = next.run(ctx.clone()).await;

            if !self.config.should_handle.matches(&outcome) {
                return outcome;
            }
            if attempt >= self.config.max_attempts {
                tracing::debug!(attempts = attempt + 1, "retry: attempts exhausted");
                return outcome;
            }

            let delay = self.delay_for(attempt, &outcome);
            if let Some(on_retry) = &self.config.on_retry {
                on_retry(&RetryEvent { attempt, outcome: &outcome, delay });
            }
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");

            tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => {
                    return Outcome::Failure(PipelineError::Cancelled);
                }
                _ = self.config.sleeper.sleep(delay) => {}
            }

            attempt += 1;
            ctx.set_attempt_number(attempt);
        }
    }
}
