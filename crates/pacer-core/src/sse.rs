//! Incremental server-sent events decoder.
//!
//! Bytes arrive in arbitrary fragments from the transport. Lines are split on
//! `\n` (a trailing `\r` is dropped), `data:` fields are joined with `\n`, and
//! a blank line dispatches the event. `[DONE]` marks the end of the stream;
//! everything after it is ignored.

use crate::pipeline::Chunk;

#[derive(Debug, thiserror::Error)]
pub enum SseError {
    #[error("invalid UTF-8 in event stream")]
    Utf8,
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Chunk(Chunk),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: String,
    has_data: bool,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a fragment; returns the events it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<SseEvent, SseError>> {
        let mut out = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.handle_line(&line, &mut out);
            } else {
                self.line.push(b);
            }
        }
        out
    }

    /// Flush a final unterminated line and pending event at end of body.
    pub fn finish(&mut self) -> Vec<Result<SseEvent, SseError>> {
        let mut out = Vec::new();
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.handle_line(&line, &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn handle_line(&mut self, line: &[u8], out: &mut Vec<Result<SseEvent, SseError>>) {
        if self.done {
            return;
        }
        let Ok(line) = std::str::from_utf8(line) else {
            out.push(Err(SseError::Utf8));
            return;
        };
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        // event/id/retry fields carry nothing the pipeline uses.
        if field == "data" {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(value);
            self.has_data = true;
        }
    }

    fn dispatch(&mut self, out: &mut Vec<Result<SseEvent, SseError>>) {
        if !self.has_data || self.done {
            return;
        }
        let data = std::mem::take(&mut self.data);
        self.has_data = false;
        if data.trim() == "[DONE]" {
            self.done = true;
            out.push(Ok(SseEvent::Done));
            return;
        }
        out.push(
            serde_json::from_str(&data)
                .map(|v| SseEvent::Chunk(Chunk::new(v)))
                .map_err(SseError::from),
        );
    }
}
