//! Composable transforms over streamed responses.
//!
//! A pipeline starts with [`source`], which attaches a cancellation token to
//! any `Unpin` stream of `Result<T, TypedError>`. Stages are plain functions
//! that wrap one stream in another:
//!
//! ```ignore
//! let seq = source(receiver, cancel.clone());
//! let text = collect(take(deltas(seq), 10)).await?;
//! ```
//!
//! Stages are lazy and single-consumer, hold at most one item (except
//! [`buffer`], which batches), and stay finished once they end.

mod chunk;
mod collect;
mod combinators;

pub use chunk::{extract_delta, Chunk, ExtractDelta};
pub use collect::{collect, collect_with, deltas};
pub use combinators::{
    buffer, filter, map, source, take, tap, Buffer, ChunkStream, Filter, Item, Map, Source, Take,
    Tap,
};
