//! Fallback strategy: substitute an alternate outcome when the inner chain
//! produces a handled failure.

use crate::strategy::{Next, Strategy};
use crate::{Context, Outcome, OutcomePredicate};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type FallbackAction<T, E> =
    dyn Fn(Outcome<T, E>, Arc<Context>) -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// Configuration for [`FallbackStrategy`].
pub struct FallbackConfig<T, E> {
    should_handle: OutcomePredicate<T, E>,
    action: Arc<FallbackAction<T, E>>,
    on_fallback: Option<Arc<dyn Fn(&Outcome<T, E>) + Send + Sync>>,
}

impl<T, E> Clone for FallbackConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            should_handle: self.should_handle.clone(),
            action: Arc::clone(&self.action),
            on_fallback: self.on_fallback.clone(),
        }
    }
}

impl<T: 'static, E: 'static> FallbackConfig<T, E> {
    /// Fall back through an async action receiving the handled outcome and
    /// the invocation context. An `Err` from the action becomes the final
    /// failure.
    pub fn action<F, Fut>(action: F) -> Self
    where
        F: Fn(Outcome<T, E>, Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            should_handle: OutcomePredicate::failures(),
            action: Arc::new(move |outcome, ctx| Box::pin(action(outcome, ctx))),
            on_fallback: None,
        }
    }

    /// Fall back to a fixed value.
    pub fn value(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
        E: Send + 'static,
    {
        Self::action(move |_outcome, _ctx| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Which outcomes trigger the fallback. Defaults to every failure.
    pub fn should_handle(mut self, predicate: OutcomePredicate<T, E>) -> Self {
        self.should_handle = predicate;
        self
    }

    /// Observe fallbacks; receives the handled outcome being replaced.
    pub fn on_fallback<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Outcome<T, E>) + Send + Sync + 'static,
    {
        self.on_fallback = Some(Arc::new(observer));
        self
    }
}

/// Strategy that replaces handled failures with an alternate outcome.
pub struct FallbackStrategy<T, E> {
    config: FallbackConfig<T, E>,
}

impl<T, E> FallbackStrategy<T, E> {
    pub fn new(config: FallbackConfig<T, E>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl<T, E> Strategy<T, E> for FallbackStrategy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E> {
        let outcome = next.run(ctx.clone()).await;
        if !self.config.should_handle.matches(&outcome) {
            return outcome;
        }

        tracing::debug!("fallback: replacing handled outcome");
        if let Some(observer) = &self.config.on_fallback {
            observer(&outcome);
        }
        let result = (self.config.action)(outcome, ctx).await;
        Outcome::from_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pipeline, PipelineError};
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
    async fn failing_callback_gets_the_fallback_value() {
        let pipeline: Pipeline<String, TestError> = Pipeline::builder()
            .fallback(FallbackConfig::value("cached".to_string()))
            .build();

        let result = pipeline
            .execute(|_ctx| async { Err::<String, _>(TestError("down".to_string())) })
            .await;

        assert_eq!(result.unwrap(), "cached");
    }

    #[tokio::test]
    async fn successes_pass_through_unchanged() {
        let pipeline: Pipeline<String, TestError> = Pipeline::builder()
            .fallback(FallbackConfig::value("cached".to_string()))
            .build();

        let result = pipeline.execute(|_ctx| async { Ok("fresh".to_string()) }).await;
        assert_eq!(result.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn action_sees_the_handled_outcome_and_context() {
        let pipeline: Pipeline<String, TestError> = Pipeline::builder()
            .fallback(FallbackConfig::action(|outcome: Outcome<String, TestError>, ctx| async move {
                let cause = outcome
                    .error()
                    .and_then(|e| e.as_inner())
                    .map(|e| e.0.clone())
                    .unwrap_or_default();
                Ok(format!("{}:{}", ctx.operation_key().unwrap_or("?"), cause))
            }))
            .build();

        let ctx = Arc::new(Context::with_operation_key("op"));
        let result = pipeline
            .execute_with(
                |_ctx| async { Err::<String, _>(TestError("cause".to_string())) },
                ctx,
            )
            .await;

        assert_eq!(result.unwrap(), "op:cause");
    }

    #[tokio::test]
    async fn failing_fallback_surfaces_its_own_error() {
        let pipeline: Pipeline<String, TestError> = Pipeline::builder()
            .fallback(FallbackConfig::action(|_outcome, _ctx| async {
                Err(TestError("fallback failed too".to_string()))
            }))
            .build();

        let result = pipeline
            .execute(|_ctx| async { Err::<String, _>(TestError("original".to_string())) })
            .await;

        match result.unwrap_err() {
            PipelineError::Inner(e) => assert_eq!(e.0, "fallback failed too"),
            e => panic!("expected Inner, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn predicate_limits_what_is_replaced() {
        let pipeline: Pipeline<String, TestError> = Pipeline::builder()
            .fallback(
                FallbackConfig::value("cached".to_string()).should_handle(
                    OutcomePredicate::when(|o: &Outcome<String, TestError>| {
                        matches!(o.error().and_then(|e| e.as_inner()), Some(e) if e.0 == "soft")
                    }),
                ),
            )
            .build();

        let soft = pipeline
            .execute(|_ctx| async { Err::<String, _>(TestError("soft".to_string())) })
            .await;
        assert_eq!(soft.unwrap(), "cached");

        let hard = pipeline
            .execute(|_ctx| async { Err::<String, _>(TestError("hard".to_string())) })
            .await;
        assert!(hard.is_err());
    }

    #[tokio::test]
    async fn observer_fires_once_per_fallback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let pipeline: Pipeline<String, TestError> = Pipeline::builder()
            .fallback(FallbackConfig::value("cached".to_string()).on_fallback(move |outcome| {
                assert!(outcome.is_failure());
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .build();

        let _ = pipeline.execute(|_ctx| async { Ok("fine".to_string()) }).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let _ = pipeline
            .execute(|_ctx| async { Err::<String, _>(TestError("down".to_string())) })
            .await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
