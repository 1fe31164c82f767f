//! Backoff strategies for the retry strategy's inter-attempt delays.

use std::time::Duration;

/// Delay growth curve between retry attempts.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Fixed delay between retries.
    Constant { delay: Duration },
    /// Linearly increasing delay.
    Linear { base: Duration },
    /// Exponentially increasing delay.
    Exponential { base: Duration },
}

impl Backoff {
    /// Create a constant backoff strategy.
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Create a linear backoff strategy.
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    /// Create an exponential backoff strategy.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base }
    }

    /// Delay before the retry following `attempt` (0-indexed: `attempt` 0 is
    /// the first failed try). Saturates instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base } => base
                .checked_mul(attempt.saturating_add(1))
                .unwrap_or(Duration::from_secs(u64::MAX)),
            Backoff::Exponential { base } => {
                let multiplier = 2u32.saturating_pow(attempt);
                base.checked_mul(multiplier).unwrap_or(Duration::from_secs(u64::MAX))
            }
        }
    }
}

impl Default for Backoff {
    /// Constant two-second delay.
    fn default() -> Self {
        Backoff::constant(Duration::from_secs(2))
    }
}
