//! Request scheduler.
//!
//! Admission control for outgoing API requests: a concurrency limit and a
//! sliding 60 second rate window, both enforced by queueing (never by failing
//! locally). Failed attempts are classified and retried through the single
//! [`RetryPolicy`](crate::retry::RetryPolicy) owned by the scheduler; each retry
//! gives its slot back during the backoff sleep and re-enters the queue.

mod admission;
mod queue;
mod submit;

pub use admission::{AdmissionState, Blocked, WINDOW};
pub use queue::SchedulerSnapshot;
pub use submit::{RetryState, Scheduler};
