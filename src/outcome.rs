//! The success/failure sum type that flows back through a pipeline.

use crate::PipelineError;
use std::future::Future;

/// Result of a single pass through the strategy chain.
///
/// Exactly one variant holds. Strategies inspect outcomes on the return path
/// and may forward, replace, or retry them; the terminal outcome is what
/// [`Pipeline::execute`](crate::Pipeline::execute) lowers back to a `Result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The operation produced a value.
    Success(T),
    /// The operation (or a strategy) failed.
    Failure(PipelineError<E>),
}

impl<T, E> Outcome<T, E> {
    /// Capture a user callback's `Result`, wrapping the error as
    /// [`PipelineError::Inner`].
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Failure(PipelineError::Inner(e)),
        }
    }

    /// Await a fallible future and capture its result as an outcome.
    pub async fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T, E>>,
    {
        Self::from_result(fut.await)
    }

    /// True when this outcome holds a value.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// True when this outcome holds an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// Borrow the success value, if present.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    /// Borrow the failure error, if present.
    pub fn error(&self) -> Option<&PipelineError<E>> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }

    /// Take the success value.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is a failure; asking a failure for its value is
    /// a programmer error, not a recoverable condition.
    pub fn expect_value(self) -> T {
        match self {
            Outcome::Success(v) => v,
            Outcome::Failure(_) => panic!("expect_value called on a Failure outcome"),
        }
    }

    /// Take the failure error.
    ///
    /// # Panics
    ///
    /// Panics if the outcome is a success.
    pub fn expect_error(self) -> PipelineError<E> {
        match self {
            Outcome::Success(_) => panic!("expect_error called on a Success outcome"),
            Outcome::Failure(e) => e,
        }
    }

    /// Lower the outcome back to a `Result`, preserving the original error.
    pub fn into_result(self) -> Result<T, PipelineError<E>> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(e) => Err(e),
        }
    }
}

impl<T, E> From<Result<T, PipelineError<E>>> for Outcome<T, E> {
    fn from(result: Result<T, PipelineError<E>>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Failure(e),
        }
    }
}
