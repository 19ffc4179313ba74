//! Retry and backoff policy.
//!
//! This module encapsulates error classification (auth, throttling, validation,
//! connection failures, timeouts) and exponential backoff decisions so that the
//! scheduler is the single place that retries requests.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_status};
pub use error::{ErrorKind, FieldError, HintAction, RawFailure, RecoveryHint, TypedError};
pub use policy::{RetryDecision, RetryPolicy};
