//! Lazy stream stages: `source`, `map`, `filter`, `take`, `tap`, `buffer`.
//!
//! Every stage pulls from its upstream through a [`Gate`], which makes the
//! stage fused (no replay after the end) and checks the cancellation token
//! before each new pull. A pull that already returned `Pending` is allowed to
//! complete even if the token fires meanwhile.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::FusedStream;
use futures::{ready, Stream};
use tokio_util::sync::CancellationToken;

use crate::retry::TypedError;

/// Item type flowing through the pipeline.
pub type Item<T> = Result<T, TypedError>;

/// A stream that can take part in a pipeline.
pub trait ChunkStream: Stream + Unpin {
    /// Token every downstream stage checks between pulls.
    fn cancel_token(&self) -> &CancellationToken;
}

#[derive(Debug)]
struct Gate {
    cancel: CancellationToken,
    done: bool,
    in_flight: bool,
}

impl Gate {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            done: false,
            in_flight: false,
        }
    }

    fn poll_upstream<S>(&mut self, upstream: &mut S, cx: &mut Context<'_>) -> Poll<Option<S::Item>>
    where
        S: Stream + Unpin,
    {
        if self.done {
            return Poll::Ready(None);
        }
        if !self.in_flight && self.cancel.is_cancelled() {
            tracing::debug!("pipeline cancelled; ending stream");
            self.done = true;
            return Poll::Ready(None);
        }
        match Pin::new(upstream).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.in_flight = false;
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.in_flight = false;
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                self.in_flight = true;
                Poll::Pending
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
    }
}

macro_rules! gated_stage {
    ($name:ident < $($p:ident),* >) => {
        impl<$($p),*> ChunkStream for $name<$($p),*>
        where
            Self: Stream + Unpin,
        {
            fn cancel_token(&self) -> &CancellationToken {
                &self.gate.cancel
            }
        }

        impl<$($p),*> FusedStream for $name<$($p),*>
        where
            Self: Stream,
        {
            fn is_terminated(&self) -> bool {
                self.gate.done
            }
        }
    };
}

/// Entry point: any `Unpin` stream of `Item<T>` plus the token that stops it.
#[derive(Debug)]
pub struct Source<S> {
    inner: S,
    gate: Gate,
}

pub fn source<S, T>(stream: S, cancel: CancellationToken) -> Source<S>
where
    S: Stream<Item = Item<T>> + Unpin,
{
    Source {
        inner: stream,
        gate: Gate::new(cancel),
    }
}

impl<S, T> Stream for Source<S>
where
    S: Stream<Item = Item<T>> + Unpin,
{
    type Item = Item<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.gate.poll_upstream(&mut this.inner, cx)
    }
}

gated_stage!(Source<S>);

/// Yields `f(chunk)` for each chunk.
#[derive(Debug)]
pub struct Map<S, F> {
    inner: S,
    f: F,
    gate: Gate,
}

pub fn map<S, T, U, F>(seq: S, f: F) -> Map<S, F>
where
    S: ChunkStream<Item = Item<T>>,
    F: FnMut(T) -> U + Unpin,
{
    let gate = Gate::new(seq.cancel_token().clone());
    Map { inner: seq, f, gate }
}

impl<S, T, U, F> Stream for Map<S, F>
where
    S: ChunkStream<Item = Item<T>>,
    F: FnMut(T) -> U + Unpin,
{
    type Item = Item<U>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(this.gate.poll_upstream(&mut this.inner, cx));
        Poll::Ready(item.map(|r| r.map(&mut this.f)))
    }
}

gated_stage!(Map<S, F>);

/// Yields only the chunks `pred` accepts. Errors always pass.
#[derive(Debug)]
pub struct Filter<S, P> {
    inner: S,
    pred: P,
    gate: Gate,
}

pub fn filter<S, T, P>(seq: S, pred: P) -> Filter<S, P>
where
    S: ChunkStream<Item = Item<T>>,
    P: FnMut(&T) -> bool + Unpin,
{
    let gate = Gate::new(seq.cancel_token().clone());
    Filter {
        inner: seq,
        pred,
        gate,
    }
}

impl<S, T, P> Stream for Filter<S, P>
where
    S: ChunkStream<Item = Item<T>>,
    P: FnMut(&T) -> bool + Unpin,
{
    type Item = Item<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.gate.poll_upstream(&mut this.inner, cx)) {
                Some(Ok(chunk)) => {
                    if (this.pred)(&chunk) {
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
                other => return Poll::Ready(other),
            }
        }
    }
}

gated_stage!(Filter<S, P>);

/// Yields at most `n` items and never pulls the item after that.
#[derive(Debug)]
pub struct Take<S> {
    inner: S,
    remaining: usize,
    gate: Gate,
}

pub fn take<S, T>(seq: S, n: usize) -> Take<S>
where
    S: ChunkStream<Item = Item<T>>,
{
    let gate = Gate::new(seq.cancel_token().clone());
    Take {
        inner: seq,
        remaining: n,
        gate,
    }
}

impl<S, T> Stream for Take<S>
where
    S: ChunkStream<Item = Item<T>>,
{
    type Item = Item<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            this.gate.finish();
            return Poll::Ready(None);
        }
        let item = ready!(this.gate.poll_upstream(&mut this.inner, cx));
        if item.is_some() {
            this.remaining -= 1;
        }
        Poll::Ready(item)
    }
}

gated_stage!(Take<S>);

/// Calls `f` on each chunk before passing it on unchanged.
///
/// An error from `f` is yielded in place of the chunk and ends the stream.
#[derive(Debug)]
pub struct Tap<S, F> {
    inner: S,
    f: F,
    gate: Gate,
}

pub fn tap<S, T, F>(seq: S, f: F) -> Tap<S, F>
where
    S: ChunkStream<Item = Item<T>>,
    F: FnMut(&T) -> Result<(), TypedError> + Unpin,
{
    let gate = Gate::new(seq.cancel_token().clone());
    Tap { inner: seq, f, gate }
}

impl<S, T, F> Stream for Tap<S, F>
where
    S: ChunkStream<Item = Item<T>>,
    F: FnMut(&T) -> Result<(), TypedError> + Unpin,
{
    type Item = Item<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.gate.poll_upstream(&mut this.inner, cx)) {
            Some(Ok(chunk)) => match (this.f)(&chunk) {
                Ok(()) => Poll::Ready(Some(Ok(chunk))),
                Err(e) => {
                    this.gate.finish();
                    Poll::Ready(Some(Err(e)))
                }
            },
            other => Poll::Ready(other),
        }
    }
}

gated_stage!(Tap<S, F>);

/// Groups consecutive chunks into vectors of up to `size` items.
///
/// The short final group is still yielded. An upstream error flushes the
/// partial group first, then surfaces.
#[derive(Debug)]
pub struct Buffer<S, T> {
    inner: S,
    size: usize,
    buf: Vec<T>,
    pending_err: Option<TypedError>,
    gate: Gate,
}

/// `size` of zero is treated as one. Items must be `Unpin` since they are
/// held in the stage between polls.
pub fn buffer<S, T>(seq: S, size: usize) -> Buffer<S, T>
where
    S: ChunkStream<Item = Item<T>>,
    T: Unpin,
{
    let size = size.max(1);
    let gate = Gate::new(seq.cancel_token().clone());
    Buffer {
        inner: seq,
        size,
        buf: Vec::with_capacity(size),
        pending_err: None,
        gate,
    }
}

impl<S, T> Buffer<S, T> {
    fn flush(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.buf, Vec::with_capacity(self.size))
    }
}

impl<S, T> Stream for Buffer<S, T>
where
    S: ChunkStream<Item = Item<T>>,
    T: Unpin,
{
    type Item = Item<Vec<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(e) = this.pending_err.take() {
            return Poll::Ready(Some(Err(e)));
        }
        loop {
            match ready!(this.gate.poll_upstream(&mut this.inner, cx)) {
                Some(Ok(chunk)) => {
                    this.buf.push(chunk);
                    if this.buf.len() >= this.size {
                        return Poll::Ready(Some(Ok(this.flush())));
                    }
                }
                Some(Err(e)) if this.buf.is_empty() => return Poll::Ready(Some(Err(e))),
                Some(Err(e)) => {
                    this.pending_err = Some(e);
                    return Poll::Ready(Some(Ok(this.flush())));
                }
                None if this.buf.is_empty() => return Poll::Ready(None),
                None => return Poll::Ready(Some(Ok(this.flush()))),
            }
        }
    }
}

gated_stage!(Buffer<S, T>);
