//! Terminal and text-oriented operations.

use futures::StreamExt;

use super::chunk::{Chunk, ExtractDelta};
use super::combinators::{filter, map, ChunkStream, Item};
use crate::retry::TypedError;

/// Drain `seq`, concatenating each item's delta. Stops at the first error.
pub async fn collect<S, T>(seq: S) -> Result<String, TypedError>
where
    S: ChunkStream<Item = Item<T>>,
    T: ExtractDelta,
{
    collect_with(seq, |_, _| {}).await
}

/// Like [`collect`], calling `on_chunk(item, index)` for every item first.
pub async fn collect_with<S, T, F>(mut seq: S, mut on_chunk: F) -> Result<String, TypedError>
where
    S: ChunkStream<Item = Item<T>>,
    T: ExtractDelta,
    F: FnMut(&T, usize),
{
    let mut out = String::new();
    let mut index = 0usize;
    while let Some(item) = seq.next().await {
        let chunk = item?;
        on_chunk(&chunk, index);
        out.push_str(&chunk.extract_delta());
        index += 1;
    }
    Ok(out)
}

/// Text deltas of a chunk stream, skipping chunks that carry none.
pub fn deltas<S>(seq: S) -> impl ChunkStream<Item = Item<String>>
where
    S: ChunkStream<Item = Item<Chunk>>,
{
    filter(map(seq, |c: Chunk| c.delta().to_string()), |s: &String| {
        !s.is_empty()
    })
}
