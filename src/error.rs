//! Error types surfaced by pipeline strategies.

use std::fmt;
use std::time::Duration;

/// Why a rate limiter refused to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The current window has no permits left.
    WindowFull,
    /// The concurrency limiter's wait queue is at capacity.
    QueueFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::WindowFull => write!(f, "window full"),
            RejectReason::QueueFull => write!(f, "queue full"),
        }
    }
}

/// Unified error type for all pipeline strategies.
///
/// User errors travel as [`PipelineError::Inner`]; the other variants are
/// synthesized by strategies only on explicit rejection (deadline elapsed,
/// circuit open, permit refused, cancellation latch tripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError<E> {
    /// The timeout strategy's deadline elapsed before the inner work finished.
    Timeout {
        /// The deadline that was enforced.
        timeout: Duration,
    },
    /// The circuit breaker rejected the call while open (or isolated).
    CircuitOpen {
        /// Time remaining until the breaker will admit a probe, when known.
        retry_after: Option<Duration>,
    },
    /// A rate limiter refused to admit the call.
    RateLimited {
        /// Which limit was hit.
        reason: RejectReason,
    },
    /// The invocation's cancellation latch tripped.
    Cancelled,
    /// The wrapped operation failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for PipelineError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { timeout } => {
                write!(f, "operation timed out (limit: {:?})", timeout)
            }
            Self::CircuitOpen { retry_after: Some(d) } => {
                write!(f, "circuit breaker open (retry after {:?})", d)
            }
            Self::CircuitOpen { retry_after: None } => {
                write!(f, "circuit breaker open")
            }
            Self::RateLimited { reason } => {
                write!(f, "rate limiter rejected request ({})", reason)
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PipelineError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> PipelineError<E> {
    /// Check if this error is a timeout rejection.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a circuit breaker rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error is a rate limiter rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if this error is a tripped cancellation latch.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error wraps an operation error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Extract the wrapped operation error, if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the wrapped operation error, if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
