//! Hedging strategy: parallel speculative attempts against a slow inner
//! chain, racing until one produces an acceptable outcome.
//!
//! Arms run as futures inside the strategy's own fan-in; nothing is spawned
//! onto the runtime, so returning drops every losing arm and no speculative
//! work can touch shared state afterwards. Each arm gets a forked context
//! whose latch is tripped when a sibling wins.

use crate::strategy::{Next, Strategy};
use crate::{Context, Outcome, OutcomePredicate, PipelineError, Sleeper, TokioSleeper};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type HedgeAction<T, E> =
    dyn Fn(Arc<Context>) -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// Fired when a hedged arm is spawned.
#[derive(Debug, Clone, Copy)]
pub struct HedgeEvent {
    /// Arm index (1 is the first hedge).
    pub attempt: u32,
    /// The delay that elapsed before this arm started.
    pub delay: Duration,
}

/// Configuration for [`HedgingStrategy`].
pub struct HedgingConfig<T, E> {
    max_hedged_attempts: u32,
    delay: Duration,
    delay_generator: Option<Arc<dyn Fn(u32) -> Duration + Send + Sync>>,
    action: Option<Arc<HedgeAction<T, E>>>,
    should_handle: OutcomePredicate<T, E>,
    on_hedging: Option<Arc<dyn Fn(&HedgeEvent) + Send + Sync>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T, E> Clone for HedgingConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            max_hedged_attempts: self.max_hedged_attempts,
            delay: self.delay,
            delay_generator: self.delay_generator.clone(),
            action: self.action.clone(),
            should_handle: self.should_handle.clone(),
            on_hedging: self.on_hedging.clone(),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<T: 'static, E: 'static> Default for HedgingConfig<T, E> {
    fn default() -> Self {
        Self {
            max_hedged_attempts: 1,
            delay: Duration::from_secs(1),
            delay_generator: None,
            action: None,
            should_handle: OutcomePredicate::failures(),
            on_hedging: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl<T: 'static, E: 'static> HedgingConfig<T, E> {
    pub fn builder() -> HedgingConfigBuilder<T, E> {
        HedgingConfigBuilder::new()
    }
}

/// Builder for [`HedgingConfig`].
pub struct HedgingConfigBuilder<T, E> {
    config: HedgingConfig<T, E>,
}

impl<T: 'static, E: 'static> Default for HedgingConfigBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> HedgingConfigBuilder<T, E> {
    pub fn new() -> Self {
        Self { config: HedgingConfig::default() }
    }

    /// Extra speculative arms beyond the primary attempt.
    pub fn max_hedged_attempts(mut self, attempts: u32) -> Self {
        self.config.max_hedged_attempts = attempts;
        self
    }

    /// Fixed delay before each hedged arm, measured from the previous arm's
    /// start.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Per-arm delay. Returning zero fans out immediately.
    pub fn delay_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.config.delay_generator = Some(Arc::new(generator));
        self
    }

    /// Replace the inner chain for hedged arms (the primary always runs the
    /// chain). Receives the arm's forked context.
    pub fn action_generator<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.config.action = Some(Arc::new(move |ctx| Box::pin(action(ctx))));
        self
    }

    /// Which outcomes keep the race going. An outcome this predicate does
    /// NOT match wins immediately. Defaults to every failure.
    pub fn should_handle(mut self, predicate: OutcomePredicate<T, E>) -> Self {
        self.config.should_handle = predicate;
        self
    }

    /// Observe each spawned hedge.
    pub fn on_hedging<F>(mut self, observer: F) -> Self
    where
        F: Fn(&HedgeEvent) + Send + Sync + 'static,
    {
        self.config.on_hedging = Some(Arc::new(observer));
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.config.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> HedgingConfig<T, E> {
        self.config
    }
}

/// Strategy that trades extra load for lower tail latency.
pub struct HedgingStrategy<T, E> {
    config: HedgingConfig<T, E>,
}

impl<T, E> HedgingStrategy<T, E> {
    pub fn new(config: HedgingConfig<T, E>) -> Self {
        Self { config }
    }

    fn delay_for(&self, arm: u32) -> Duration {
        match &self.config.delay_generator {
            Some(generator) => generator(arm),
            None => self.config.delay,
        }
    }

    fn cancel_arms(&self, arm_ctxs: &[Arc<Context>]) {
        for arm in arm_ctxs {
            arm.cancel();
        }
    }
}

#[async_trait]
impl<T, E> Strategy<T, E> for HedgingStrategy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E> {
        let total_arms = self.config.max_hedged_attempts.saturating_add(1);
        let mut arms: FuturesUnordered<BoxFuture<'_, Outcome<T, E>>> = FuturesUnordered::new();
        let mut arm_ctxs: Vec<Arc<Context>> = Vec::with_capacity(total_arms as usize);

        // The primary runs on a fork too, so a winning sibling can be
        // cancelled without ever touching the caller's latch.
        let primary = Arc::new(ctx.fork());
        arm_ctxs.push(primary.clone());
        arms.push(next.run(primary));

        let mut spawned: u32 = 1;
        let mut last_handled: Option<Outcome<T, E>> = None;

        // Phase one: arms still to spawn. Each window waits out the delay
        // measured from the previous arm's start while draining finished
        // arms.
        while spawned < total_arms {
            let delay = self.delay_for(spawned - 1);
            let mut delay_fut = self.config.sleeper.sleep(delay);
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancellation().cancelled() => {
                        self.cancel_arms(&arm_ctxs);
                        return Outcome::Failure(PipelineError::Cancelled);
                    }
                    maybe = arms.next(), if !arms.is_empty() => {
                        if let Some(outcome) = maybe {
                            if !self.config.should_handle.matches(&outcome) {
                                self.cancel_arms(&arm_ctxs);
                                return outcome;
                            }
                            last_handled = Some(outcome);
                        }
                    }
                    _ = &mut delay_fut => {
                        let fork = Arc::new(ctx.fork());
                        fork.set_attempt_number(spawned);
                        arm_ctxs.push(fork.clone());
                        if let Some(observer) = &self.config.on_hedging {
                            observer(&HedgeEvent { attempt: spawned, delay });
                        }
                        tracing::debug!(attempt = spawned, "hedging: spawning arm");
                        let fut: BoxFuture<'_, Outcome<T, E>> = match &self.config.action {
                            Some(action) => {
                                let work = action(fork);
                                Box::pin(async move { Outcome::from_result(work.await) })
                            }
                            None => next.run(fork),
                        };
                        arms.push(fut);
                        spawned += 1;
                        break;
                    }
                }
            }
        }

        // Phase two: the full fan-in race.
        loop {
            tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => {
                    self.cancel_arms(&arm_ctxs);
                    return Outcome::Failure(PipelineError::Cancelled);
                }
                maybe = arms.next() => {
                    match maybe {
                        Some(outcome) => {
                            if !self.config.should_handle.matches(&outcome) {
                                self.cancel_arms(&arm_ctxs);
                                return outcome;
                            }
                            last_handled = Some(outcome);
                        }
                        None => break,
                    }
                }
            }
        }

        // Every arm retired with a handled outcome; the most recent one is
        // the result.
        match last_handled {
            Some(outcome) => outcome,
            None => unreachable!("hedging always runs at least one arm"),
        }
    }
}
