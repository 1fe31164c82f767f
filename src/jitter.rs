//! Jitter strategies to prevent thundering herd on retry.

use rand::Rng;
use std::time::Duration;

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone)]
pub enum Jitter {
    /// No jitter - use the exact backoff delay.
    None,
    /// Full jitter: random between 0 and the delay.
    Full,
    /// Equal jitter: random between delay/2 and the delay.
    Equal,
    /// Banded jitter: random multiple of the delay in `[min_factor, max_factor]`.
    Ranged { min_factor: f64, max_factor: f64 },
}

impl Jitter {
    /// Create a full jitter strategy.
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Create an equal jitter strategy.
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Create a banded jitter strategy. Factors below zero are clamped to
    /// zero; an inverted band is swapped.
    pub fn ranged(min_factor: f64, max_factor: f64) -> Self {
        let lo = min_factor.max(0.0);
        let hi = max_factor.max(0.0);
        if lo <= hi {
            Jitter::Ranged { min_factor: lo, max_factor: hi }
        } else {
            Jitter::Ranged { min_factor: hi, max_factor: lo }
        }
    }

    /// The ±20% band used by retry's `use_jitter` switch.
    pub fn standard() -> Self {
        Jitter::ranged(0.8, 1.2)
    }

    /// Apply jitter to a delay duration.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Apply jitter with a caller-supplied RNG (deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let half = millis / 2;
                Duration::from_millis(rng.random_range(half..=millis))
            }
            Jitter::Ranged { min_factor, max_factor } => {
                if delay.is_zero() || (max_factor - min_factor).abs() < f64::EPSILON {
                    return delay.mul_f64(*min_factor);
                }
                let factor = rng.random_range(*min_factor..=*max_factor);
                delay.mul_f64(factor)
            }
        }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::None
    }
}
