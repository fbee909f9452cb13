//! Exponential backoff with full jitter

use std::future::Future;
use std::time::Duration;

use rand::Rng;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

// 2^20 seconds is already far beyond any sane backoff
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Result of one attempt, tagged with whether it is worth retrying
#[derive(Debug)]
pub enum Attempt<T> {
    Complete(T),
    Retry(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Upper bound of the delay after the 0-indexed attempt `attempt`
    pub fn max_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(factor)
    }

    /// Delay drawn uniformly from `[0, 2^attempt * base_delay]`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay_for(attempt).as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=cap))
    }

    /// Run `op` until it completes or the attempt budget is spent
    ///
    /// `op` receives the 0-indexed attempt number. When every attempt asks for
    /// a retry, the last attempt's value is returned. Retryable values are
    /// dropped before sleeping, which aborts any response still attached.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> T
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Attempt::Complete(value) => return value,
                Attempt::Retry(value) => {
                    if attempt + 1 >= max_attempts {
                        tracing::warn!(attempts = max_attempts, "retry budget exhausted");
                        return value;
                    }
                    drop(value);
                    let delay = self.delay_for(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
