//! Outcome predicates: the `should_handle` hooks strategies consult before
//! reacting, plus small combinators for composing them.

use crate::{Outcome, PipelineError};
use std::sync::Arc;

/// A reusable predicate over outcomes.
///
/// Each strategy carries one of these to decide whether an outcome triggers
/// its reaction (retry it, trip the breaker, fall back, hedge again, ...).
pub struct OutcomePredicate<T, E> {
    f: Arc<dyn Fn(&Outcome<T, E>) -> bool + Send + Sync>,
}

impl<T, E> Clone for OutcomePredicate<T, E> {
    fn clone(&self) -> Self {
        Self { f: Arc::clone(&self.f) }
    }
}

impl<T, E> std::fmt::Debug for OutcomePredicate<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OutcomePredicate")
    }
}

impl<T: 'static, E: 'static> OutcomePredicate<T, E> {
    /// Build a predicate from an arbitrary closure.
    pub fn when<F>(f: F) -> Self
    where
        F: Fn(&Outcome<T, E>) -> bool + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Matches every failure, whatever its variant. The default for most
    /// strategies.
    pub fn failures() -> Self {
        Self::when(|outcome| outcome.is_failure())
    }

    /// Matches only failures coming from the wrapped operation itself,
    /// ignoring strategy rejections (timeouts, open circuits, ...).
    pub fn inner_failures() -> Self {
        Self::when(|outcome| matches!(outcome, Outcome::Failure(PipelineError::Inner(_))))
    }

    /// Matches every success. The cache strategy's default `should_cache`.
    pub fn successes() -> Self {
        Self::when(|outcome| outcome.is_success())
    }

    /// Matches nothing.
    pub fn never() -> Self {
        Self::when(|_| false)
    }

    /// Short-circuiting disjunction.
    pub fn or(self, other: Self) -> Self {
        Self::when(move |outcome| (self.f)(outcome) || (other.f)(outcome))
    }

    /// Short-circuiting conjunction.
    pub fn and(self, other: Self) -> Self {
        Self::when(move |outcome| (self.f)(outcome) && (other.f)(outcome))
    }

    /// Evaluate the predicate.
    pub fn matches(&self, outcome: &Outcome<T, E>) -> bool {
        (self.f)(outcome)
    }
}

impl<T: 'static, E: 'static> Default for OutcomePredicate<T, E> {
    fn default() -> Self {
        Self::failures()
    }
}
