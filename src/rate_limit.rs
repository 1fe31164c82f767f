//! Rate limiter strategy: fixed window, sliding window, or a concurrency
//! limiter with a FIFO wait queue.
//!
//! The window algorithms reject immediately when full; only the concurrency
//! limiter queues. State lives under a mutex held across synchronous updates
//! only, never across an await.

use crate::strategy::{Next, Strategy};
use crate::{Clock, Context, MonotonicClock, Outcome, PipelineError, RejectReason};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Errors returned when configuring a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimiterConfigError {
    #[error("permit_limit must be > 0")]
    ZeroPermitLimit,
    #[error("window must be > 0")]
    ZeroWindow,
}

/// Fired when a call is refused.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitEvent {
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy)]
enum LimiterKind {
    FixedWindow { permit_limit: u32, window: Duration },
    SlidingWindow { permit_limit: u32, window: Duration },
    Concurrency { permit_limit: u32, queue_limit: u32 },
}

/// Configuration for [`RateLimiterStrategy`]; algorithm chosen at
/// construction.
pub struct RateLimiterConfig {
    kind: LimiterKind,
    on_rejected: Option<Arc<dyn Fn(&RateLimitEvent) + Send + Sync>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterConfig").field("kind", &self.kind).finish()
    }
}

impl RateLimiterConfig {
    /// `permit_limit` admissions per `window`, counted against a window that
    /// resets wholesale at each boundary.
    pub fn fixed_window(
        permit_limit: u32,
        window: Duration,
    ) -> Result<Self, RateLimiterConfigError> {
        if permit_limit == 0 {
            return Err(RateLimiterConfigError::ZeroPermitLimit);
        }
        if window.is_zero() {
            return Err(RateLimiterConfigError::ZeroWindow);
        }
        Ok(Self::with_kind(LimiterKind::FixedWindow { permit_limit, window }))
    }

    /// `permit_limit` admissions within any trailing `window`, tracked as a
    /// log of permit timestamps.
    pub fn sliding_window(
        permit_limit: u32,
        window: Duration,
    ) -> Result<Self, RateLimiterConfigError> {
        if permit_limit == 0 {
            return Err(RateLimiterConfigError::ZeroPermitLimit);
        }
        if window.is_zero() {
            return Err(RateLimiterConfigError::ZeroWindow);
        }
        Ok(Self::with_kind(LimiterKind::SlidingWindow { permit_limit, window }))
    }

    /// At most `permit_limit` calls in flight; up to `queue_limit` further
    /// callers wait FIFO for a released permit.
    pub fn concurrency(
        permit_limit: u32,
        queue_limit: u32,
    ) -> Result<Self, RateLimiterConfigError> {
        if permit_limit == 0 {
            return Err(RateLimiterConfigError::ZeroPermitLimit);
        }
        Ok(Self::with_kind(LimiterKind::Concurrency { permit_limit, queue_limit }))
    }

    fn with_kind(kind: LimiterKind) -> Self {
        Self { kind, on_rejected: None, clock: Arc::new(MonotonicClock::default()) }
    }

    /// Observe rejections.
    pub fn on_rejected<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RateLimitEvent) + Send + Sync + 'static,
    {
        self.on_rejected = Some(Arc::new(observer));
        self
    }

    /// Override the clock (deterministic tests). Ignored by the concurrency
    /// algorithm, which is not time-based.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[derive(Debug)]
struct FixedWindowState {
    window_start: u64,
    count: u32,
}

#[derive(Debug)]
struct SlidingWindowState {
    log: VecDeque<u64>,
}

#[derive(Debug)]
struct ConcurrencyState {
    in_use: u32,
    queue: VecDeque<oneshot::Sender<()>>,
}

#[derive(Debug)]
enum LimiterState {
    Fixed(FixedWindowState),
    Sliding(SlidingWindowState),
    Concurrency(ConcurrencyState),
}

enum Admission {
    Now,
    Queued(oneshot::Receiver<()>),
    Reject(RejectReason),
}

/// Strategy that bounds the admission rate of the inner chain.
pub struct RateLimiterStrategy<T, E> {
    kind: LimiterKind,
    state: Mutex<LimiterState>,
    clock: Arc<dyn Clock>,
    on_rejected: Option<Arc<dyn Fn(&RateLimitEvent) + Send + Sync>>,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<T, E> RateLimiterStrategy<T, E> {
    pub fn new(config: RateLimiterConfig) -> Self {
        let state = match config.kind {
            LimiterKind::FixedWindow { .. } => {
                LimiterState::Fixed(FixedWindowState { window_start: 0, count: 0 })
            }
            LimiterKind::SlidingWindow { .. } => {
                LimiterState::Sliding(SlidingWindowState { log: VecDeque::new() })
            }
            LimiterKind::Concurrency { .. } => {
                LimiterState::Concurrency(ConcurrencyState { in_use: 0, queue: VecDeque::new() })
            }
        };
        Self {
            kind: config.kind,
            state: Mutex::new(state),
            clock: config.clock,
            on_rejected: config.on_rejected,
            _marker: PhantomData,
        }
    }

    fn try_acquire(&self) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match (self.kind, &mut *state) {
            (LimiterKind::FixedWindow { permit_limit, window }, LimiterState::Fixed(fixed)) => {
                let now = self.clock.now_millis();
                if now.saturating_sub(fixed.window_start) >= window.as_millis() as u64 {
                    fixed.window_start = now;
                    fixed.count = 0;
                }
                if fixed.count < permit_limit {
                    fixed.count += 1;
                    Admission::Now
                } else {
                    Admission::Reject(RejectReason::WindowFull)
                }
            }
            (LimiterKind::SlidingWindow { permit_limit, window }, LimiterState::Sliding(sliding)) => {
                let now = self.clock.now_millis();
                let cutoff = now.saturating_sub(window.as_millis() as u64);
                while sliding.log.front().is_some_and(|&t| t <= cutoff) {
                    sliding.log.pop_front();
                }
                if (sliding.log.len() as u32) < permit_limit {
                    sliding.log.push_back(now);
                    Admission::Now
                } else {
                    Admission::Reject(RejectReason::WindowFull)
                }
            }
            (LimiterKind::Concurrency { permit_limit, queue_limit }, LimiterState::Concurrency(conc)) => {
                if conc.in_use < permit_limit {
                    conc.in_use += 1;
                    Admission::Now
                } else if (conc.queue.len() as u32) < queue_limit {
                    let (tx, rx) = oneshot::channel();
                    conc.queue.push_back(tx);
                    Admission::Queued(rx)
                } else {
                    Admission::Reject(RejectReason::QueueFull)
                }
            }
            _ => unreachable!("limiter state matches its kind by construction"),
        }
    }

    /// Hand the permit to the eldest live waiter, or retire it.
    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let LimiterState::Concurrency(conc) = &mut *state {
            loop {
                match conc.queue.pop_front() {
                    Some(waiter) => {
                        if waiter.send(()).is_ok() {
                            return;
                        }
                        // Waiter cancelled while queued; skip it.
                    }
                    None => {
                        conc.in_use = conc.in_use.saturating_sub(1);
                        return;
                    }
                }
            }
        }
    }

    fn reject(&self, reason: RejectReason) -> Outcome<T, E> {
        tracing::debug!(%reason, "rate limiter: rejecting call");
        if let Some(observer) = &self.on_rejected {
            observer(&RateLimitEvent { reason });
        }
        Outcome::Failure(PipelineError::RateLimited { reason })
    }
}

#[async_trait]
impl<T, E> Strategy<T, E> for RateLimiterStrategy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E> {
        let holds_permit = match self.try_acquire() {
            Admission::Reject(reason) => return self.reject(reason),
            Admission::Now => matches!(self.kind, LimiterKind::Concurrency { .. }),
            Admission::Queued(waiter) => {
                tokio::select! {
                    biased;
                    _ = ctx.cancellation().cancelled() => {
                        // Dropping the receiver marks the queue slot dead;
                        // release() skips it.
                        return Outcome::Failure(PipelineError::Cancelled);
                    }
                    admitted = waiter => {
                        if admitted.is_err() {
                            // The limiter was dropped out from under us.
                            return self.reject(RejectReason::QueueFull);
                        }
                    }
                }
                true
            }
        };

        let outcome = next.run(ctx).await;
        if holds_permit {
            self.release();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pipeline;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn configs_validate_their_inputs() {
        assert_eq!(
            RateLimiterConfig::fixed_window(0, Duration::from_secs(1)).unwrap_err(),
            RateLimiterConfigError::ZeroPermitLimit
        );
        assert_eq!(
            RateLimiterConfig::sliding_window(1, Duration::ZERO).unwrap_err(),
            RateLimiterConfigError::ZeroWindow
        );
        assert!(RateLimiterConfig::concurrency(1, 0).is_ok());
    }

    #[tokio::test]
    async fn fixed_window_admits_up_to_the_limit_then_rejects() {
        let clock = ManualClock::new();
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .rate_limit(
                RateLimiterConfig::fixed_window(3, Duration::from_secs(1))
                    .unwrap()
                    .with_clock(clock.clone()),
            )
            .build();

        for _ in 0..3 {
            assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_ok());
        }
        let err = pipeline.execute(|_ctx| async { Ok(1) }).await.unwrap_err();
        match err {
            PipelineError::RateLimited { reason } => assert_eq!(reason, RejectReason::WindowFull),
            e => panic!("expected RateLimited, got {:?}", e),
        }

        // A fresh window resets the count wholesale.
        clock.advance(1_000);
        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_ok());
    }

    #[tokio::test]
    async fn sliding_window_frees_permits_as_timestamps_age_out() {
        let clock = ManualClock::new();
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .rate_limit(
                RateLimiterConfig::sliding_window(2, Duration::from_millis(100))
                    .unwrap()
                    .with_clock(clock.clone()),
            )
            .build();

        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_ok()); // t=0
        clock.advance(60);
        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_ok()); // t=60
        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_err()); // both live

        // t=110: the t=0 permit has aged out, the t=60 one has not.
        clock.advance(50);
        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_ok());
        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_err());
    }

    #[tokio::test]
    async fn sliding_window_caps_any_trailing_window() {
        let clock = ManualClock::new();
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .rate_limit(
                RateLimiterConfig::sliding_window(3, Duration::from_secs(1))
                    .unwrap()
                    .with_clock(clock.clone()),
            )
            .build();

        let mut admitted = 0;
        for _ in 0..5 {
            if pipeline.execute(|_ctx| async { Ok(1) }).await.is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[tokio::test]
    async fn concurrency_limiter_queues_then_admits_fifo() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .rate_limit(RateLimiterConfig::concurrency(1, 2).unwrap())
            .build();
        let pipeline = Arc::new(pipeline);

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        // Occupy the only permit until released.
        let holder = {
            let pipeline = pipeline.clone();
            let order = order.clone();
            let release_rx = release_rx.clone();
            tokio::spawn(async move {
                pipeline
                    .execute(move |_ctx| {
                        let order = order.clone();
                        let rx = release_rx.clone();
                        async move {
                            order.lock().unwrap().push("holder");
                            if let Some(rx) = rx.lock().await.take() {
                                let _ = rx.await;
                            }
                            Ok(0)
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;

        // Two waiters fit in the queue...
        let mut waiters = Vec::new();
        for i in 1..=2 {
            let pipeline = pipeline.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                pipeline
                    .execute(move |_ctx| {
                        let order = order.clone();
                        async move {
                            order.lock().unwrap().push(if i == 1 { "first" } else { "second" });
                            Ok(i)
                        }
                    })
                    .await
            }));
            // Deterministic queue order.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // ...a third caller is refused outright.
        let overflow = pipeline.execute(|_ctx| async { Ok(9) }).await;
        match overflow.unwrap_err() {
            PipelineError::RateLimited { reason } => assert_eq!(reason, RejectReason::QueueFull),
            e => panic!("expected RateLimited, got {:?}", e),
        }

        release_tx.send(()).unwrap();
        assert_eq!(holder.await.unwrap().unwrap(), 0);
        for waiter in waiters {
            assert!(waiter.await.unwrap().is_ok());
        }
        assert_eq!(*order.lock().unwrap(), vec!["holder", "first", "second"]);
    }

    #[tokio::test]
    async fn permits_release_on_failure_too() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .rate_limit(RateLimiterConfig::concurrency(1, 0).unwrap())
            .build();

        for _ in 0..3 {
            let result = pipeline
                .execute(|_ctx| async { Err::<i32, _>(TestError("fail".to_string())) })
                .await;
            assert!(matches!(result.unwrap_err(), PipelineError::Inner(_)));
        }
    }

    #[tokio::test]
    async fn queued_waiter_abandons_on_cancellation() {
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .rate_limit(RateLimiterConfig::concurrency(1, 1).unwrap())
            .build();
        let pipeline = Arc::new(pipeline);

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let holder = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .execute(move |_ctx| {
                        let rx = release_rx.clone();
                        async move {
                            if let Some(rx) = rx.lock().await.take() {
                                let _ = rx.await;
                            }
                            Ok(0)
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ctx = Arc::new(Context::new());
        let ctx_clone = ctx.clone();
        let waiter = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline.execute_with(|_ctx| async { Ok(1) }, ctx_clone).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        ctx.cancel();
        let result = waiter.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());

        // The dead waiter is skipped; the permit is simply released.
        release_tx.send(()).unwrap();
        assert!(holder.await.unwrap().is_ok());
        assert!(pipeline.execute(|_ctx| async { Ok(2) }).await.is_ok());
    }

    #[tokio::test]
    async fn on_rejected_observer_fires_with_the_reason() {
        let rejections = Arc::new(AtomicUsize::new(0));
        let rejections_clone = rejections.clone();
        let pipeline: Pipeline<i32, TestError> = Pipeline::builder()
            .rate_limit(
                RateLimiterConfig::fixed_window(1, Duration::from_secs(10))
                    .unwrap()
                    .on_rejected(move |event| {
                        assert_eq!(event.reason, RejectReason::WindowFull);
                        rejections_clone.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .build();

        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_ok());
        assert!(pipeline.execute(|_ctx| async { Ok(1) }).await.is_err());
        assert_eq!(rejections.load(Ordering::SeqCst), 1);
    }
}
