//! Exponential backoff with jitter

use bon::Builder;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Builder)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[builder(default = 5)]
    pub max_attempts: u32,
    #[builder(default = Duration::from_millis(500))]
    pub base_delay: Duration,
    #[builder(default = Duration::from_secs(30))]
    pub max_delay: Duration,
    #[builder(default = true)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    ///
    /// `base * 2^(attempt-1)` capped at `max_delay`; with jitter the result
    /// lands uniformly in `[delay/2, delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if !self.jitter {
            return delay;
        }

        let half_ms = (delay.as_millis() / 2) as u64;
        let spread = rand::thread_rng().gen_range(0..=half_ms);
        Duration::from_millis(half_ms + spread)
    }

    /// Honor an upstream `Retry-After`, never exceeding `max_delay`
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for(attempt);
        match retry_after {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }
}
