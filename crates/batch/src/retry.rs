use std::time::{Duration, SystemTime, UNIX_EPOCH};

use maidx_core::config::BatchConfig;

/// Re-enqueue policy for retryable job failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Re-enqueues after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound (exclusive) of random jitter added to each delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            ..Self::default()
        }
    }

    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made <= self.max_retries
    }

    /// Wait before the attempt after `attempts_made`.
    ///
    /// Exponential in the attempt number, capped at `max_delay`, plus jitter.
    /// A larger server-requested `retry_after` wins.
    pub fn delay_for(&self, attempts_made: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempts_made.saturating_sub(1).min(32) as i32;
        let base_ms = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exp);
        let capped = Duration::from_millis(base_ms.min(self.max_delay.as_millis() as f64) as u64);
        let delay = capped + jitter(self.jitter);
        match retry_after {
            Some(wait) if wait > delay => wait,
            _ => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: Duration::from_millis(100),
        }
    }
}

/// Jitter without rand: nanosecond fraction of the current time.
fn jitter(bound: Duration) -> Duration {
    let bound_ms = bound.as_millis() as u32;
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    Duration::from_millis(u64::from(nanos % bound_ms))
}
