//! Exponential backoff for durable reward writes

use std::time::Duration;

use crate::config::RetryConfig;

/// Bounded exponential backoff.
///
/// Delay before retry `n` (1-based) is `base * multiplier^(n-1)`, capped at
/// `max_delay`. `next_delay` returns `None` once `max_attempts` writes have
/// been made.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1.0),
            max_delay,
            attempts: 0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Record a failed attempt and get the delay before the next one.
    ///
    /// Returns `None` when the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            return None;
        }
        let exponent = i32::try_from(self.attempts - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
