//! Backoff policy for managed transactions.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter.
///
/// The first retry waits `initial_delay`; each following retry
/// multiplies the delay by `multiplier` up to `max_delay`. Every sleep
/// is stretched by a random fraction in `0..=jitter` so parallel
/// retriers spread out. A whole managed transaction gives up once the
/// elapsed time plus the next sleep would pass `max_retry_time`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total time budget for all attempts of one transaction.
    pub max_retry_time: Duration,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Additive jitter fraction in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay for the attempt after `current`, capped at `max_delay`.
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.multiplier;
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// `delay` stretched by a random fraction in `0..=jitter`.
    pub(crate) fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..=self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }

    /// Whether another attempt fits inside the time budget.
    pub(crate) fn allows_retry(&self, elapsed: Duration, next_delay: Duration) -> bool {
        elapsed + next_delay <= self.max_retry_time
    }
}
