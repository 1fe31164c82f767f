//! Circuit breaker strategy: a rolling-window failure-ratio state machine.
//!
//! Closed forwards calls and samples their outcomes; Open rejects
//! immediately until the break elapses; HalfOpen admits a single probe whose
//! verdict decides between reopening and closing. A fourth state, Isolated,
//! is entered only through the manual [`CircuitHandle`].

use crate::strategy::{Next, Strategy};
use crate::{Clock, Context, MonotonicClock, Outcome, OutcomePredicate, PipelineError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Forwarding calls, sampling outcomes.
    Closed,
    /// Rejecting all calls until the break elapses.
    Open,
    /// Admitting exactly one probe call.
    HalfOpen,
    /// Manually held open via [`CircuitHandle::isolate`].
    Isolated,
}

/// Errors returned when configuring a breaker.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CircuitConfigError {
    #[error("failure_ratio must be within (0, 1], got {0}")]
    InvalidFailureRatio(f64),
    #[error("minimum_throughput must be > 0")]
    ZeroThroughput,
    #[error("sampling_duration must be > 0")]
    ZeroSamplingDuration,
    #[error("break_duration must be > 0")]
    ZeroBreakDuration,
}

/// Fired when the breaker trips open.
#[derive(Debug, Clone, Copy)]
pub struct OpenedEvent {
    /// Handled outcomes in the window at trip time.
    pub failures: u32,
    /// Total sampled outcomes in the window at trip time.
    pub total: u32,
    /// How long the breaker will stay open.
    pub break_duration: Duration,
}

/// Configuration for [`CircuitBreakerStrategy`].
pub struct CircuitBreakerConfig<T, E> {
    failure_ratio: f64,
    minimum_throughput: u32,
    sampling_duration: Duration,
    break_duration: Duration,
    should_handle: OutcomePredicate<T, E>,
    on_opened: Option<Arc<dyn Fn(&OpenedEvent) + Send + Sync>>,
    on_closed: Option<Arc<dyn Fn() + Send + Sync>>,
    on_half_opened: Option<Arc<dyn Fn() + Send + Sync>>,
    clock: Arc<dyn Clock>,
}

impl<T: 'static, E: 'static> CircuitBreakerConfig<T, E> {
    pub fn builder() -> CircuitBreakerConfigBuilder<T, E> {
        CircuitBreakerConfigBuilder::new()
    }
}

/// Builder for [`CircuitBreakerConfig`]. Validation happens in
/// [`CircuitBreakerConfigBuilder::build`].
pub struct CircuitBreakerConfigBuilder<T, E> {
    failure_ratio: f64,
    minimum_throughput: u32,
    sampling_duration: Duration,
    break_duration: Duration,
    should_handle: OutcomePredicate<T, E>,
    on_opened: Option<Arc<dyn Fn(&OpenedEvent) + Send + Sync>>,
    on_closed: Option<Arc<dyn Fn() + Send + Sync>>,
    on_half_opened: Option<Arc<dyn Fn() + Send + Sync>>,
    clock: Arc<dyn Clock>,
}

impl<T: 'static, E: 'static> Default for CircuitBreakerConfigBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> CircuitBreakerConfigBuilder<T, E> {
    pub fn new() -> Self {
        Self {
            failure_ratio: 0.5,
            minimum_throughput: 10,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(5),
            should_handle: OutcomePredicate::failures(),
            on_opened: None,
            on_closed: None,
            on_half_opened: None,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Failure share of the window that trips the breaker, in `(0, 1]`.
    pub fn failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = ratio;
        self
    }

    /// Minimum sampled calls before the ratio is consulted.
    pub fn minimum_throughput(mut self, throughput: u32) -> Self {
        self.minimum_throughput = throughput;
        self
    }

    /// Width of the rolling sample window.
    pub fn sampling_duration(mut self, duration: Duration) -> Self {
        self.sampling_duration = duration;
        self
    }

    /// How long an opened breaker rejects before probing.
    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Which outcomes count as failures. Defaults to every failure.
    pub fn should_handle(mut self, predicate: OutcomePredicate<T, E>) -> Self {
        self.should_handle = predicate;
        self
    }

    pub fn on_opened<F>(mut self, observer: F) -> Self
    where
        F: Fn(&OpenedEvent) + Send + Sync + 'static,
    {
        self.on_opened = Some(Arc::new(observer));
        self
    }

    pub fn on_closed<F>(mut self, observer: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_closed = Some(Arc::new(observer));
        self
    }

    pub fn on_half_opened<F>(mut self, observer: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_half_opened = Some(Arc::new(observer));
        self
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig<T, E>, CircuitConfigError> {
        if !(self.failure_ratio > 0.0 && self.failure_ratio <= 1.0) {
            return Err(CircuitConfigError::InvalidFailureRatio(self.failure_ratio));
        }
        if self.minimum_throughput == 0 {
            return Err(CircuitConfigError::ZeroThroughput);
        }
        if self.sampling_duration.is_zero() {
            return Err(CircuitConfigError::ZeroSamplingDuration);
        }
        if self.break_duration.is_zero() {
            return Err(CircuitConfigError::ZeroBreakDuration);
        }
        Ok(CircuitBreakerConfig {
            failure_ratio: self.failure_ratio,
            minimum_throughput: self.minimum_throughput,
            sampling_duration: self.sampling_duration,
            break_duration: self.break_duration,
            should_handle: self.should_handle,
            on_opened: self.on_opened,
            on_closed: self.on_closed,
            on_half_opened: self.on_half_opened,
            clock: self.clock,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: u64,
    failed: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: VecDeque<Sample>,
    open_until: u64,
    probe_in_flight: bool,
}

#[derive(Debug)]
struct BreakerShared {
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
    failure_ratio: f64,
    minimum_throughput: u32,
    sampling_duration_ms: u64,
    break_duration_ms: u64,
}

enum Admission {
    Allow { probe: bool, half_opened: bool },
    Reject { retry_after: Option<Duration> },
}

enum Transition {
    Opened { failures: u32, total: u32 },
    Closed,
}

impl BreakerShared {
    fn try_admit(&self) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let now = self.clock.now_millis();
        match inner.state {
            CircuitState::Isolated => Admission::Reject { retry_after: None },
            CircuitState::Closed => Admission::Allow { probe: false, half_opened: false },
            CircuitState::Open => {
                if now >= inner.open_until {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Admission::Allow { probe: true, half_opened: true }
                } else {
                    let remaining = Duration::from_millis(inner.open_until - now);
                    Admission::Reject { retry_after: Some(remaining) }
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Reject { retry_after: None }
                } else {
                    inner.probe_in_flight = true;
                    Admission::Allow { probe: true, half_opened: false }
                }
            }
        }
    }

    fn record(&self, failed: bool, probe: bool) -> Option<Transition> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let now = self.clock.now_millis();

        if probe {
            inner.probe_in_flight = false;
            // The handle may have isolated or reset the breaker while the
            // probe was in flight; its verdict no longer applies then.
            if inner.state != CircuitState::HalfOpen {
                return None;
            }
            if failed {
                inner.state = CircuitState::Open;
                inner.open_until = now + self.break_duration_ms;
                inner.window.clear();
                return Some(Transition::Opened {
                    failures: 1,
                    total: 1,
                });
            }
            inner.state = CircuitState::Closed;
            inner.open_until = 0;
            inner.window.clear();
            return Some(Transition::Closed);
        }

        if inner.state != CircuitState::Closed {
            // A call admitted while closed can complete after the breaker
            // has already tripped; its sample is stale.
            return None;
        }

        inner.window.push_back(Sample { at: now, failed });
        let cutoff = now.saturating_sub(self.sampling_duration_ms);
        while inner.window.front().is_some_and(|s| s.at < cutoff) {
            inner.window.pop_front();
        }

        let total = inner.window.len() as u32;
        let failures = inner.window.iter().filter(|s| s.failed).count() as u32;
        if total >= self.minimum_throughput
            && failures as f64 / total as f64 >= self.failure_ratio
        {
            inner.state = CircuitState::Open;
            inner.open_until = now + self.break_duration_ms;
            inner.window.clear();
            return Some(Transition::Opened { failures, total });
        }
        None
    }

    fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).state
    }

    fn isolate(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.state = CircuitState::Isolated;
        inner.window.clear();
        inner.probe_in_flight = false;
    }

    fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.open_until = 0;
        inner.probe_in_flight = false;
    }
}

/// Read/write handle scoped to one breaker instance.
///
/// Exposes the current state for external inspection and the manual
/// isolate/reset operations. Obtained from
/// [`CircuitBreakerStrategy::handle`] or
/// [`PipelineBuilder::circuit_breaker_with_handle`](crate::PipelineBuilder::circuit_breaker_with_handle).
#[derive(Debug, Clone)]
pub struct CircuitHandle {
    shared: Arc<BreakerShared>,
}

impl CircuitHandle {
    /// Current state. `Open` may be reported after the break has elapsed;
    /// the transition to `HalfOpen` happens lazily at the next call.
    pub fn state(&self) -> CircuitState {
        self.shared.state()
    }

    /// Hold the breaker open until [`CircuitHandle::reset`]. Calls are
    /// rejected as circuit-open while isolated.
    pub fn isolate(&self) {
        tracing::info!("circuit breaker → isolated");
        self.shared.isolate();
    }

    /// Force the breaker closed with a cleared window.
    pub fn reset(&self) {
        tracing::info!("circuit breaker → closed (manual reset)");
        self.shared.reset();
    }
}

/// Strategy that short-circuits calls to a failing dependency.
pub struct CircuitBreakerStrategy<T, E> {
    shared: Arc<BreakerShared>,
    break_duration: Duration,
    should_handle: OutcomePredicate<T, E>,
    on_opened: Option<Arc<dyn Fn(&OpenedEvent) + Send + Sync>>,
    on_closed: Option<Arc<dyn Fn() + Send + Sync>>,
    on_half_opened: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<T, E> CircuitBreakerStrategy<T, E> {
    pub fn new(config: CircuitBreakerConfig<T, E>) -> Self {
        let shared = Arc::new(BreakerShared {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                open_until: 0,
                probe_in_flight: false,
            }),
            clock: config.clock,
            failure_ratio: config.failure_ratio,
            minimum_throughput: config.minimum_throughput,
            sampling_duration_ms: config.sampling_duration.as_millis() as u64,
            break_duration_ms: config.break_duration.as_millis() as u64,
        });
        Self {
            shared,
            break_duration: config.break_duration,
            should_handle: config.should_handle,
            on_opened: config.on_opened,
            on_closed: config.on_closed,
            on_half_opened: config.on_half_opened,
        }
    }

    /// The read/write handle for this breaker instance.
    pub fn handle(&self) -> CircuitHandle {
        CircuitHandle { shared: Arc::clone(&self.shared) }
    }
}

#[async_trait]
impl<T, E> Strategy<T, E> for CircuitBreakerStrategy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E> {
        match self.shared.try_admit() {
            Admission::Reject { retry_after } => {
                tracing::debug!(?retry_after, "circuit breaker: rejecting while open");
                Outcome::Failure(PipelineError::CircuitOpen { retry_after })
            }
            Admission::Allow { probe, half_opened } => {
                if half_opened {
                    tracing::info!("circuit breaker → half-open");
                    if let Some(observer) = &self.on_half_opened {
                        observer();
                    }
                }

                let outcome = next.run(ctx).await;
                let failed = self.should_handle.matches(&outcome);

                match self.shared.record(failed, probe) {
                    Some(Transition::Opened { failures, total }) => {
                        tracing::warn!(failures, total, "circuit breaker → open");
                        if let Some(observer) = &self.on_opened {
                            observer(&OpenedEvent {
                                failures,
                                total,
                                break_duration: self.break_duration,
                            });
                        }
                    }
                    Some(Transition::Closed) => {
                        tracing::info!("circuit breaker → closed");
                        if let Some(observer) = &self.on_closed {
                            observer();
                        }
                    }
                    None => {}
                }
                outcome
            }
        }
    }
}
