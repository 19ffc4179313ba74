//! Integration tests: scheduler admission, ordering, retry and cancellation.
//!
//! Run on a paused tokio clock so the 60 second window and backoff sleeps
//! complete instantly while elapsed times stay exact.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use pacer_core::config::SchedulerConfig;
use pacer_core::retry::{ErrorKind, RawFailure, RetryPolicy};
use pacer_core::scheduler::Scheduler;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn limits(max_concurrent: usize, requests_per_minute: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent,
        requests_per_minute,
    }
}

fn fixed_backoff(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn status(code: u16) -> RawFailure {
    RawFailure::Status {
        status: code,
        body: String::new(),
        retry_after: None,
    }
}

/// Submit `n` tasks that record their start offset and run for `work`.
async fn run_recorded(sched: &Scheduler, n: usize, work: Duration) -> Vec<(usize, Duration)> {
    let t0 = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let futs = (0..n).map(|id| {
        let starts = Arc::clone(&starts);
        sched.submit(move || {
            let starts = Arc::clone(&starts);
            async move {
                starts.lock().unwrap().push((id, t0.elapsed()));
                tokio::time::sleep(work).await;
                Ok::<_, RawFailure>(id)
            }
        })
    });
    for r in join_all(futs).await {
        r.unwrap();
    }
    let out = starts.lock().unwrap().clone();
    out
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_batches_work() {
    let sched = Scheduler::new(limits(2, 1000), RetryPolicy::none());
    let t0 = Instant::now();
    let starts = run_recorded(&sched, 5, Duration::from_millis(10)).await;
    let elapsed = t0.elapsed();

    assert!(elapsed >= Duration::from_millis(30), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(40), "{elapsed:?}");
    let ids: Vec<usize> = starts.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    let ms: Vec<u128> = starts.iter().map(|(_, t)| t.as_millis()).collect();
    assert_eq!(ms, vec![0, 0, 10, 10, 20]);
    assert_eq!(sched.snapshot().running, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_window_delays_excess_requests() {
    let sched = Scheduler::new(limits(10, 3), RetryPolicy::none());
    let starts = run_recorded(&sched, 4, Duration::ZERO).await;

    for (_, t) in &starts[..3] {
        assert_eq!(*t, Duration::ZERO);
    }
    assert_eq!(starts[3].0, 3);
    assert!(starts[3].1 >= Duration::from_secs(60), "{:?}", starts[3].1);
    assert!(starts[3].1 < Duration::from_secs(61), "{:?}", starts[3].1);
}

#[tokio::test(start_paused = true)]
async fn fifo_order_under_single_slot() {
    let sched = Scheduler::new(limits(1, 1000), RetryPolicy::none());
    let starts = run_recorded(&sched, 6, Duration::from_millis(1)).await;
    let ids: Vec<usize> = starts.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (0..6).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_task_retries_until_success() {
    let sched = Scheduler::new(limits(4, 1000), fixed_backoff(3));
    let attempts = Arc::new(AtomicU32::new(0));
    let t0 = Instant::now();
    let counter = Arc::clone(&attempts);
    let out = sched
        .submit(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 3 {
                    Err(status(429))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(out, "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(t0.elapsed() >= Duration::from_millis(100 + 200 + 400));
}

#[tokio::test(start_paused = true)]
async fn validation_error_fails_fast() {
    let sched = Scheduler::new(limits(4, 1000), fixed_backoff(3));
    let attempts = Arc::new(AtomicU32::new(0));
    let t0 = Instant::now();
    let counter = Arc::clone(&attempts);
    let err = sched
        .submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(RawFailure::Status {
                    status: 400,
                    body: r#"{"error":{"message":"bad temperature","param":"temperature"}}"#
                        .to_string(),
                    retry_after: None,
                })
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.field.as_ref().map(|f| f.field.as_str()), Some("temperature"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(t0.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded_by_max_retries() {
    for max_retries in [0u32, 1, 2, 5] {
        let sched = Scheduler::new(limits(4, 1000), fixed_backoff(max_retries));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let err = sched
            .submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(status(503)) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Api);
        assert_eq!(err.status, Some(503));
        assert_eq!(attempts.load(Ordering::SeqCst), 1 + max_retries);
    }
}

#[tokio::test(start_paused = true)]
async fn server_retry_after_is_honored() {
    let sched = Scheduler::new(limits(4, 1000), fixed_backoff(1));
    let attempts = Arc::new(AtomicU32::new(0));
    let t0 = Instant::now();
    let counter = Arc::clone(&attempts);
    sched
        .submit(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RawFailure::Status {
                        status: 429,
                        body: String::new(),
                        retry_after: Some(Duration::from_secs(3)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(t0.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn cancel_while_queued_never_runs_task() {
    let sched = Scheduler::new(limits(1, 1000), RetryPolicy::none());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let mut release_rx = Some(release_rx);

    let holder = {
        let sched = sched.clone();
        tokio::spawn(async move {
            sched
                .submit(move || {
                    let rx = release_rx.take();
                    async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        Ok::<_, RawFailure>(())
                    }
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(sched.snapshot().running, 1);

    let cancel = CancellationToken::new();
    let ran = Arc::new(AtomicU32::new(0));
    let waiter = {
        let sched = sched.clone();
        let cancel = cancel.clone();
        let ran = Arc::clone(&ran);
        tokio::spawn(async move {
            sched
                .submit_with_cancel(
                    move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                        async { Ok::<_, RawFailure>(()) }
                    },
                    &cancel,
                )
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(sched.snapshot().queued, 1);

    cancel.cancel();
    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(sched.snapshot().queued, 0);

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    assert_eq!(sched.snapshot().running, 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_retrying() {
    let sched = Scheduler::new(limits(4, 1000), fixed_backoff(5));
    let cancel = CancellationToken::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let trigger = cancel.clone();
    let err = sched
        .submit_with_cancel(
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    trigger.cancel();
                }
                async { Err::<(), _>(status(503)) }
            },
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn raising_limits_admits_queued_work() {
    let sched = Scheduler::new(limits(1, 1000), RetryPolicy::none());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let mut release_rx = Some(release_rx);

    let holder = {
        let sched = sched.clone();
        tokio::spawn(async move {
            sched
                .submit(move || {
                    let rx = release_rx.take();
                    async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        Ok::<_, RawFailure>(())
                    }
                })
                .await
        })
    };
    let second = {
        let sched = sched.clone();
        tokio::spawn(async move { sched.submit(|| async { Ok::<_, RawFailure>(2) }).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(sched.snapshot().queued, 1);

    sched.configure(limits(2, 1000));
    assert_eq!(second.await.unwrap().unwrap(), 2);
    assert_eq!(sched.snapshot().running, 1);

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn rate_window_counts_retries() {
    let sched = Scheduler::new(limits(4, 2), fixed_backoff(2));
    let attempts = Arc::new(AtomicU32::new(0));
    let t0 = Instant::now();
    let counter = Arc::clone(&attempts);
    sched
        .submit(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(status(503))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();
    // Third attempt waits for the first timestamp to leave the window.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(t0.elapsed() >= Duration::from_secs(60));
}

/// Occupy one slot until the returned sender fires.
async fn hold_slot(
    sched: &Scheduler,
) -> (
    tokio::sync::oneshot::Sender<()>,
    tokio::task::JoinHandle<Result<(), pacer_core::retry::TypedError>>,
) {
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let mut release_rx = Some(release_rx);
    let sched = sched.clone();
    let holder = tokio::spawn(async move {
        sched
            .submit(move || {
                let rx = release_rx.take();
                async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok::<_, RawFailure>(())
                }
            })
            .await
    });
    tokio::task::yield_now().await;
    (release_tx, holder)
}

/// A later request still gets a slot well before an hour passes.
async fn assert_next_submit_admitted(sched: &Scheduler) {
    let next = tokio::time::timeout(
        Duration::from_secs(3600),
        sched.submit(|| async { Ok::<_, RawFailure>("next") }),
    )
    .await;
    assert_eq!(next.expect("later submit was never admitted").unwrap(), "next");
    assert_eq!(sched.snapshot().running, 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_a_queued_submit_leaves_the_queue() {
    let sched = Scheduler::new(limits(1, 1000), RetryPolicy::none());
    let (release_tx, holder) = hold_slot(&sched).await;
    assert_eq!(sched.snapshot().running, 1);

    let mut queued = Box::pin(sched.submit(|| async { Ok::<_, RawFailure>(()) }));
    assert!(futures::poll!(queued.as_mut()).is_pending());
    assert_eq!(sched.snapshot().queued, 1);
    drop(queued);
    assert_eq!(sched.snapshot().queued, 0);

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    assert_eq!(sched.snapshot().running, 0);
    assert_next_submit_admitted(&sched).await;
}

#[tokio::test(start_paused = true)]
async fn dropping_an_admitted_submit_returns_its_slot() {
    let sched = Scheduler::new(limits(1, 1000), RetryPolicy::none());
    let (release_tx, holder) = hold_slot(&sched).await;

    let ran = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&ran);
    let mut waiting = Box::pin(sched.submit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, RawFailure>(()) }
    }));
    assert!(futures::poll!(waiting.as_mut()).is_pending());

    // The holder finishing hands its slot to the waiter, which is never polled again.
    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    let snap = sched.snapshot();
    assert_eq!((snap.running, snap.queued), (1, 0));

    drop(waiting);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(sched.snapshot().running, 0);
    assert_next_submit_admitted(&sched).await;
}

#[tokio::test(start_paused = true)]
async fn timed_out_submits_do_not_stall_the_scheduler() {
    let sched = Scheduler::new(limits(2, 1000), RetryPolicy::none());
    let (release_a, holder_a) = hold_slot(&sched).await;
    let (release_b, holder_b) = hold_slot(&sched).await;
    assert_eq!(sched.snapshot().running, 2);

    for _ in 0..4 {
        let res = tokio::time::timeout(
            Duration::from_millis(5),
            sched.submit(|| async { Ok::<_, RawFailure>(()) }),
        )
        .await;
        assert!(res.is_err());
    }
    assert_eq!(sched.snapshot().queued, 0);

    release_a.send(()).unwrap();
    release_b.send(()).unwrap();
    holder_a.await.unwrap().unwrap();
    holder_b.await.unwrap().unwrap();
    assert_next_submit_admitted(&sched).await;
}
