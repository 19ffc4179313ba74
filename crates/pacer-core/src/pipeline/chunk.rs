//! Streamed response chunks and delta extraction.

use std::borrow::Cow;

use serde_json::Value;

/// One event of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub data: Value,
}

impl Chunk {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// Incremental text carried by this chunk, or `""`.
    pub fn delta(&self) -> &str {
        extract_delta(self)
    }
}

// Chat-style, completion-style, message-delta style, and single-field shapes.
// A non-streamed chat response counts as one chunk carrying the full message.
const DELTA_POINTERS: [&str; 7] = [
    "/choices/0/delta/content",
    "/choices/0/message/content",
    "/choices/0/text",
    "/delta/text",
    "/token/text",
    "/response",
    "/output",
];

/// Narrow a raw chunk to its incremental text payload.
pub fn extract_delta(chunk: &Chunk) -> &str {
    DELTA_POINTERS
        .iter()
        .find_map(|p| chunk.data.pointer(p).and_then(Value::as_str))
        .unwrap_or("")
}

/// Items whose text can be concatenated by [`collect`](super::collect).
pub trait ExtractDelta {
    fn extract_delta(&self) -> Cow<'_, str>;
}

impl ExtractDelta for Chunk {
    fn extract_delta(&self) -> Cow<'_, str> {
        Cow::Borrowed(extract_delta(self))
    }
}

impl ExtractDelta for String {
    fn extract_delta(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

impl ExtractDelta for &str {
    fn extract_delta(&self) -> Cow<'_, str> {
        Cow::Borrowed(*self)
    }
}

impl<T: ExtractDelta> ExtractDelta for Vec<T> {
    fn extract_delta(&self) -> Cow<'_, str> {
        Cow::Owned(self.iter().map(|c| c.extract_delta()).collect())
    }
}
