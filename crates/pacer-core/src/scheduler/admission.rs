//! Concurrency counter plus sliding-window start log.
//!
//! A request may start only when fewer than `max_concurrent` requests are
//! running and fewer than `requests_per_minute` starts happened in the trailing
//! [`WINDOW`]. Both checks are independent and both must pass.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::SchedulerConfig;

/// Length of the rate-limit window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Why a request could not start right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    /// All concurrency slots are taken; a completion will free one.
    Concurrency,
    /// The window is full; the oldest start ages out after `retry_in`.
    Window { retry_in: Duration },
}

#[derive(Debug)]
pub struct AdmissionState {
    running: usize,
    max_concurrent: usize,
    requests_per_minute: usize,
    /// Start timestamps, oldest first.
    window: VecDeque<Instant>,
}

impl AdmissionState {
    pub fn new(cfg: SchedulerConfig) -> Self {
        let cfg = cfg.normalized();
        Self {
            running: 0,
            max_concurrent: cfg.max_concurrent,
            requests_per_minute: cfg.requests_per_minute,
            window: VecDeque::new(),
        }
    }

    /// Replace the limits. Requests already running are unaffected.
    pub fn configure(&mut self, cfg: SchedulerConfig) {
        let cfg = cfg.normalized();
        self.max_concurrent = cfg.max_concurrent;
        self.requests_per_minute = cfg.requests_per_minute;
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn limits(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent,
            requests_per_minute: self.requests_per_minute,
        }
    }

    /// Starts recorded in the window ending at `now`.
    pub fn window_count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.window.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Check both limits without changing anything but the pruned window.
    pub fn check(&mut self, now: Instant) -> Result<(), Blocked> {
        self.prune(now);
        if self.running >= self.max_concurrent {
            return Err(Blocked::Concurrency);
        }
        if self.window.len() >= self.requests_per_minute {
            // Window is non-empty here because requests_per_minute >= 1.
            let oldest = self.window.front().copied().unwrap_or(now);
            let retry_in = (oldest + WINDOW).saturating_duration_since(now);
            return Err(Blocked::Window { retry_in });
        }
        Ok(())
    }

    /// Take a slot and record a start at `now` if both limits allow it.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Blocked> {
        self.check(now)?;
        self.running += 1;
        self.window.push_back(now);
        Ok(())
    }

    /// Reverse the most recent [`try_admit`](Self::try_admit) when its waiter vanished.
    pub fn undo_admit(&mut self) {
        self.running = self.running.saturating_sub(1);
        self.window.pop_back();
    }

    /// Give a slot back after the request finished (success or failure).
    pub fn release(&mut self) {
        self.running = self.running.saturating_sub(1);
    }
}
