//! The strategy contract and the chain-dispatch handle.
//!
//! A pipeline is an onion: each strategy receives a [`Next`] handle that
//! descends one layer further in, ultimately reaching the user callback at
//! the center. A strategy may run its `next` zero, one, or many times and
//! may replace the outcome on the way back out.

use crate::{Context, Outcome};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Type-erased user callback at the center of the onion.
pub(crate) type Callback<'a, T, E> =
    dyn Fn(Arc<Context>) -> BoxFuture<'static, Result<T, E>> + Send + Sync + 'a;

/// A single fault-handling policy in a pipeline.
///
/// Implementations are polymorphic only over the value type `T` and the
/// user error `E`; configuration lives in the concrete strategy struct.
#[async_trait]
pub trait Strategy<T, E>: Send + Sync {
    /// Run the wrapped work (via `next`) under this strategy's policy.
    async fn execute_core(&self, next: Next<'_, T, E>, ctx: Arc<Context>) -> Outcome<T, E>;
}

/// Handle to the remainder of the strategy chain.
///
/// Calling [`Next::run`] invokes the next strategy inward, or the user
/// callback once the chain is exhausted. The handle is `Copy`, so strategies
/// that iterate attempts (retry, hedging) can run it as often as they need.
pub struct Next<'a, T, E> {
    chain: &'a [Arc<dyn Strategy<T, E>>],
    callback: &'a Callback<'a, T, E>,
}

impl<'a, T, E> Clone for Next<'a, T, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T, E> Copy for Next<'a, T, E> {}

impl<'a, T, E> Next<'a, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(
        chain: &'a [Arc<dyn Strategy<T, E>>],
        callback: &'a Callback<'a, T, E>,
    ) -> Self {
        Self { chain, callback }
    }

    /// Descend one layer: the next strategy if any remain, else the user
    /// callback with its result captured as an [`Outcome`].
    pub fn run(self, ctx: Arc<Context>) -> BoxFuture<'a, Outcome<T, E>> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                let next = Next { chain: rest, callback: self.callback };
                head.execute_core(next, ctx)
            }
            None => {
                let fut = (self.callback)(ctx);
                Box::pin(async move { Outcome::from_result(fut.await) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tag {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Strategy<i32, &'static str> for Tag {
        async fn execute_core(
            &self,
            next: Next<'_, i32, &'static str>,
            ctx: Arc<Context>,
        ) -> Outcome<i32, &'static str> {
            self.log.lock().unwrap().push(self.name);
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn empty_chain_runs_the_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let callback = move |_ctx: Arc<Context>| -> BoxFuture<'static, Result<i32, &'static str>> {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            })
        };

        let chain: [Arc<dyn Strategy<i32, &'static str>>; 0] = [];
        let next = Next::new(&chain, &callback);
        let outcome = next.run(Arc::new(Context::new())).await;

        assert_eq!(outcome.value(), Some(&5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_errors_are_captured_as_inner_failures() {
        let callback = |_ctx: Arc<Context>| -> BoxFuture<'static, Result<i32, &'static str>> {
            Box::pin(async { Err("boom") })
        };

        let chain: [Arc<dyn Strategy<i32, &'static str>>; 0] = [];
        let outcome = Next::new(&chain, &callback).run(Arc::new(Context::new())).await;

        assert_eq!(outcome.error(), Some(&PipelineError::Inner("boom")));
    }

    #[tokio::test]
    async fn chain_runs_in_insertion_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Strategy<i32, &'static str>>> = vec![
            Arc::new(Tag { name: "outer", log: log.clone() }),
            Arc::new(Tag { name: "inner", log: log.clone() }),
        ];
        let callback = |_ctx: Arc<Context>| -> BoxFuture<'static, Result<i32, &'static str>> {
            Box::pin(async { Ok(0) })
        };

        let outcome = Next::new(&chain, &callback).run(Arc::new(Context::new())).await;
        assert!(outcome.is_success());
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }
}
