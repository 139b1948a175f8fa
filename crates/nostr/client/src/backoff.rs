//! Reconnect backoff with jitter.
//!
//! There is deliberately no attempt limit: a relay link keeps retrying for as
//! long as anyone references it, so the sequence never runs dry.

use rand::Rng;
use std::time::Duration;

/// Jitter strategy to apply to backoff delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// No jitter; always return the capped exponential delay.
    None,
    /// Full jitter; return a random delay in `[0, capped_delay]`.
    Full,
    /// Equal jitter; half the capped delay plus a random share of the other half.
    Equal,
}

/// Exponential backoff calculator.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter: Jitter,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: Jitter::Equal,
            attempt: 0,
        }
    }

    /// Override the jitter strategy (defaults to `Equal`).
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(base * 2^attempt, max)` for the current attempt, before jitter.
    pub fn capped_delay(&self) -> Duration {
        let base_ms = self.base_delay.as_millis();
        let max_ms = self.max_delay.as_millis();
        let multiplier = 1u128.checked_shl(self.attempt.min(63)).unwrap_or(u128::MAX);
        let capped_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(capped_ms.min(u64::MAX as u128) as u64)
    }

    /// Get the next delay in the sequence and advance the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let capped_ms = self.capped_delay().as_millis() as u64;

        let delay_ms = match self.jitter {
            Jitter::None => capped_ms,
            Jitter::Full => rand::rng().random_range(0..=capped_ms),
            Jitter::Equal => {
                let half = capped_ms / 2;
                half + rand::rng().random_range(0..=capped_ms - half)
            }
        };

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay_ms)
    }

    /// Reset the attempt counter.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Current attempt count (number of delays generated so far).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
