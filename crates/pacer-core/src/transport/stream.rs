//! Streaming POST: curl thread feeding an SSE decoder into a channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use super::headers::ResponseHead;
use super::{curl_failure, run_transfer, status_failure, Prepared};
use crate::pipeline::{Chunk, Item};
use crate::retry::{classify, RawFailure};
use crate::sse::{SseDecoder, SseError, SseEvent};

/// Chunks of one streamed response, in arrival order.
///
/// Ends after `[DONE]`, at end of body, or after yielding one error.
#[derive(Debug)]
pub struct ChunkReceiver {
    rx: mpsc::Receiver<Item<Chunk>>,
}

impl ChunkReceiver {
    pub fn new(rx: mpsc::Receiver<Item<Chunk>>) -> Self {
        Self { rx }
    }
}

impl Stream for ChunkReceiver {
    type Item = Item<Chunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// What to do with decoded events.
enum Forward {
    Continue,
    /// `[DONE]` seen, a decode error was sent, or the receiver is gone.
    Stop,
}

fn forward(events: Vec<Result<SseEvent, SseError>>, tx: &mpsc::Sender<Item<Chunk>>) -> Forward {
    for event in events {
        let item = match event {
            Ok(SseEvent::Chunk(chunk)) => Ok(chunk),
            Ok(SseEvent::Done) => return Forward::Stop,
            Err(e) => Err(classify(RawFailure::MalformedBody(e.to_string()))),
        };
        let is_err = item.is_err();
        if tx.blocking_send(item).is_err() || is_err {
            return Forward::Stop;
        }
    }
    Forward::Continue
}

/// Runs on the blocking pool. `ready` resolves once the status is known.
pub(super) fn perform_stream(
    req: &Prepared,
    ready: oneshot::Sender<Result<(), RawFailure>>,
    tx: mpsc::Sender<Item<Chunk>>,
) {
    let mut easy = match req.easy() {
        Ok(e) => e,
        Err(e) => {
            let _ = ready.send(Err(curl_failure(&e)));
            return;
        }
    };

    let head = ResponseHead::default();
    let mut ready = Some(ready);
    let mut error_body = Vec::new();
    let mut decoder = SseDecoder::new();
    let mut stopped = false;

    let result = run_transfer(&mut easy, &head, || !tx.is_closed(), |data| {
        if !head.is_success() {
            error_body.extend_from_slice(data);
            return data.len();
        }
        if let Some(r) = ready.take() {
            if r.send(Ok(())).is_err() {
                stopped = true;
                return 0;
            }
        }
        match forward(decoder.feed(data), &tx) {
            Forward::Continue => data.len(),
            Forward::Stop => {
                stopped = true;
                0
            }
        }
    });

    match result {
        Err(e) if stopped && e.is_write_error() => {}
        Err(e) if e.is_aborted_by_callback() => {
            tracing::debug!("stream receiver dropped; transfer aborted");
        }
        Err(e) => {
            let raw = curl_failure(&e);
            match ready.take() {
                Some(r) => {
                    let _ = r.send(Err(raw));
                }
                None => {
                    tracing::warn!("stream interrupted: {}", e);
                    let _ = tx.blocking_send(Err(classify(raw)));
                }
            }
        }
        Ok(()) => {
            if !head.is_success() {
                if let Some(r) = ready.take() {
                    let _ = r.send(Err(status_failure(&head, &error_body)));
                }
                return;
            }
            if let Some(r) = ready.take() {
                let _ = r.send(Ok(()));
            }
            let _ = forward(decoder.finish(), &tx);
        }
    }
}
