use std::time::Duration;

use rand::Rng;

use super::error::TypedError;
use crate::config::RetryConfig;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a cap, optional full jitter and server hints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (3 means up to 4 invocations).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay, including server-provided ones.
    pub max_delay: Duration,
    /// Growth factor between consecutive retries.
    pub backoff_multiplier: f64,
    /// Replace each computed delay with a uniform value in `[0, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_multiplier: cfg.backoff_multiplier,
            jitter: cfg.jitter,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Decide whether to retry after `attempt` (1-based) failed with `err`.
    pub fn decide(&self, attempt: u32, err: &TypedError) -> RetryDecision {
        self.decide_with_rng(attempt, err, &mut rand::thread_rng())
    }

    /// Like [`decide`](Self::decide) with an explicit jitter source.
    pub fn decide_with_rng<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        err: &TypedError,
        rng: &mut R,
    ) -> RetryDecision {
        if attempt > self.max_retries || !err.is_retryable() {
            return RetryDecision::NoRetry;
        }
        if let Some(hint) = err.retry_after {
            return RetryDecision::RetryAfter(hint.min(self.max_delay));
        }
        let delay = self.backoff_delay(attempt);
        if self.jitter {
            RetryDecision::RetryAfter(full_jitter(delay, rng))
        } else {
            RetryDecision::RetryAfter(delay)
        }
    }

    /// Unjittered delay for `attempt`: `initial * multiplier^(attempt-1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exp);
        let raw_ms = self.initial_delay.as_millis() as f64 * factor;
        let max_ms = self.max_delay.as_millis() as f64;
        if !raw_ms.is_finite() || raw_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(raw_ms.round() as u64)
        }
    }
}

fn full_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..=ms))
}
