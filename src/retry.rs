//! Retry policy shared by extraction, scraping, and forward sync.
//!
//! Retry behavior is data: a [`RetryPolicy`] decides whether a failed attempt
//! gets another try and how long to wait first. Delays follow
//! `min(base * 2^(attempt-1), max)` plus uniform jitter in
//! `[0, jitter * delay]`.

use std::future::Future;
use std::time::Duration;

use inkdex_core::error::PipelineError;
use rand::Rng;
use tracing::debug;

use crate::config::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a fraction of the computed delay, in `[0, 1]`.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Same policy with a different attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Policy with no waiting, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based),
    /// without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`base_backoff`](Self::base_backoff) plus random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }

    /// Whether a failure on attempt number `attempt` gets another try.
    pub fn should_retry(&self, err: &PipelineError, attempt: u32) -> bool {
        err.is_retryable() && attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Returns the final result and the number of attempts made.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> (Result<T, PipelineError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return (Ok(v), attempt),
                Err(err) if self.should_retry(&err, attempt) => {
                    let delay = self.backoff(attempt);
                    debug!(what, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
