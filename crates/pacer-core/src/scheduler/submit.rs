//! `Scheduler::submit`: admission, invocation and the retry loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{PacerConfig, SchedulerConfig};
use crate::retry::{classify, RawFailure, RetryDecision, RetryPolicy, TypedError};

use super::queue::{SchedulerSnapshot, Shared, Slot};

/// Bookkeeping for one logical request across its attempts.
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    /// Attempts made so far (1-based once the first one started).
    pub attempt: u32,
    pub last_error: Option<TypedError>,
    pub next_delay: Option<Duration>,
}

/// Concurrency- and rate-limited executor for request tasks.
///
/// Cheap to clone; clones share the same limits and queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("snapshot", &self.snapshot())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig, policy: RetryPolicy) -> Self {
        Self::with_clock(cfg, policy, SystemClock)
    }

    /// Build with an explicit time source.
    pub fn with_clock(cfg: SchedulerConfig, policy: RetryPolicy, clock: impl Clock) -> Self {
        Self {
            shared: Arc::new(Shared::new(cfg, Arc::new(clock))),
            policy,
        }
    }

    pub fn from_config(cfg: &PacerConfig) -> Self {
        Self::new(cfg.scheduler, RetryPolicy::from(&cfg.retry_or_default()))
    }

    /// Replace the admission limits; queued requests are re-evaluated immediately.
    pub fn configure(&self, cfg: SchedulerConfig) {
        self.shared.configure(cfg);
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.shared.snapshot()
    }

    /// Run `task` under admission control, retrying per the policy.
    ///
    /// The closure is invoked once per attempt, so whatever it captures must be
    /// safe to replay.
    pub async fn submit<T, F, Fut>(&self, task: F) -> Result<T, TypedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        self.submit_with_cancel(task, &CancellationToken::new()).await
    }

    /// Like [`submit`](Self::submit), stopping at the next wait point once
    /// `cancel` fires. An attempt already running is left to finish.
    pub async fn submit_with_cancel<T, F, Fut>(
        &self,
        mut task: F,
        cancel: &CancellationToken,
    ) -> Result<T, TypedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let mut retry = RetryState::default();
        loop {
            let slot = self.acquire(cancel).await?;
            retry.attempt += 1;
            let outcome = task().await;
            // The slot is not held across the backoff sleep.
            drop(slot);

            let err = match outcome {
                Ok(value) => {
                    if retry.attempt > 1 {
                        tracing::debug!(attempts = retry.attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(raw) => classify(raw),
            };

            match self.policy.decide(retry.attempt, &err) {
                RetryDecision::NoRetry => {
                    tracing::debug!(
                        attempt = retry.attempt,
                        kind = %err.kind,
                        "request failed; not retrying"
                    );
                    return Err(err);
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        attempt = retry.attempt,
                        kind = %err.kind,
                        delay_ms = delay.as_millis() as u64,
                        "request failed; retrying: {}",
                        err.message
                    );
                    retry.last_error = Some(err);
                    retry.next_delay = Some(delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(TypedError::cancelled()),
                    }
                }
            }
        }
    }

    /// Wait in FIFO order for a slot.
    ///
    /// Dropping the returned future at any point leaves the queue and the
    /// running count as if the request had never been submitted.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Slot, TypedError> {
        if cancel.is_cancelled() {
            return Err(TypedError::cancelled());
        }
        let mut waiting = self.shared.enqueue();
        tokio::select! {
            biased;
            res = waiting.admitted() => res.map_err(|_| TypedError::cancelled()),
            _ = cancel.cancelled() => Err(TypedError::cancelled()),
        }
    }
}
