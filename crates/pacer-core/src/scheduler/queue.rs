//! Admission state and FIFO wait queue behind a single mutex.
//!
//! Every mutation of the counters or the queue happens under `Shared::state`;
//! the lock is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::config::SchedulerConfig;

use super::admission::{AdmissionState, Blocked};

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub running: usize,
    pub queued: usize,
    pub window_count: usize,
    pub limits: SchedulerConfig,
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<Slot>,
}

/// Holds one concurrency slot; gives it back on drop.
///
/// Handed to the waiter through its channel, so a slot that is never
/// received is released when the receiver goes away.
pub(super) struct Slot {
    shared: Option<Arc<Shared>>,
}

impl Slot {
    /// Drop without releasing; for use under the state lock.
    fn disarm(mut self) {
        self.shared = None;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release();
        }
    }
}

/// A queued request. Leaves the queue when dropped, and returns its slot if
/// one was granted but not yet taken.
pub(super) struct Waiting {
    shared: Arc<Shared>,
    ticket: u64,
    rx: oneshot::Receiver<Slot>,
}

impl Waiting {
    /// Resolves once this waiter holds a slot.
    pub(super) async fn admitted(&mut self) -> Result<Slot, oneshot::error::RecvError> {
        (&mut self.rx).await
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        self.shared.withdraw(self.ticket);
    }
}

struct State {
    admission: AdmissionState,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    timer_armed: bool,
}

pub(super) struct Shared {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    pub(super) fn new(cfg: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State {
                admission: AdmissionState::new(cfg),
                queue: VecDeque::new(),
                next_ticket: 0,
                timer_armed: false,
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the back of the queue and admit as many waiters as capacity allows.
    ///
    /// The returned waiter may already be admitted.
    pub(super) fn enqueue(self: &Arc<Self>) -> Waiting {
        let (tx, rx) = oneshot::channel();
        let mut st = self.lock();
        let ticket = st.next_ticket;
        st.next_ticket += 1;
        st.queue.push_back(Waiter { ticket, tx });
        self.drain(&mut st);
        drop(st);
        Waiting {
            shared: Arc::clone(self),
            ticket,
            rx,
        }
    }

    /// Remove a waiter that is still queued; no-op once it was admitted.
    fn withdraw(&self, ticket: u64) {
        let mut st = self.lock();
        st.queue.retain(|w| w.ticket != ticket);
    }

    /// Return a slot and hand it to the next waiter(s).
    pub(super) fn release(self: &Arc<Self>) {
        let mut st = self.lock();
        st.admission.release();
        self.drain(&mut st);
    }

    pub(super) fn configure(self: &Arc<Self>, cfg: SchedulerConfig) {
        let mut st = self.lock();
        st.admission.configure(cfg);
        tracing::debug!(
            max_concurrent = cfg.max_concurrent,
            requests_per_minute = cfg.requests_per_minute,
            "scheduler limits updated"
        );
        self.drain(&mut st);
    }

    pub(super) fn snapshot(&self) -> SchedulerSnapshot {
        let now = self.clock.now();
        let mut st = self.lock();
        SchedulerSnapshot {
            running: st.admission.running(),
            queued: st.queue.len(),
            window_count: st.admission.window_count(now),
            limits: st.admission.limits(),
        }
    }

    fn drain(self: &Arc<Self>, st: &mut State) {
        let now = self.clock.now();
        while let Some(head) = st.queue.front() {
            if head.tx.is_closed() {
                st.queue.pop_front();
                continue;
            }
            match st.admission.try_admit(now) {
                Ok(()) => {
                    let Some(waiter) = st.queue.pop_front() else {
                        break;
                    };
                    let slot = Slot {
                        shared: Some(Arc::clone(self)),
                    };
                    if let Err(slot) = waiter.tx.send(slot) {
                        slot.disarm();
                        st.admission.undo_admit();
                        continue;
                    }
                    tracing::debug!(
                        ticket = waiter.ticket,
                        running = st.admission.running(),
                        queued = st.queue.len(),
                        "request admitted"
                    );
                }
                Err(Blocked::Concurrency) => break,
                Err(Blocked::Window { retry_in }) => {
                    tracing::debug!(
                        queued = st.queue.len(),
                        retry_in_ms = retry_in.as_millis() as u64,
                        "rate window full; holding queue"
                    );
                    self.arm_timer(st, retry_in);
                    break;
                }
            }
        }
    }

    /// Schedule one re-drain for when the oldest window entry expires.
    fn arm_timer(self: &Arc<Self>, st: &mut State, wait: Duration) {
        if st.timer_armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime; queued requests wait for the next completion");
            return;
        };
        st.timer_armed = true;
        let weak: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(shared) = weak.upgrade() {
                let mut st = shared.lock();
                st.timer_armed = false;
                shared.drain(&mut st);
            }
        });
    }
}
