//! Response header bookkeeping shared by the curl callbacks.

use std::cell::Cell;
use std::str;
use std::time::Duration;

/// Status and `Retry-After` of the latest response in a transfer.
///
/// Cells so the header callback and the write callback can both hold a
/// shared reference while curl drives the transfer.
#[derive(Debug, Default)]
pub(crate) struct ResponseHead {
    status: Cell<u32>,
    retry_after: Cell<Option<Duration>>,
}

impl ResponseHead {
    /// Record one raw header line. A status line resets previous values
    /// (redirects and `100 Continue` produce several).
    pub(crate) fn record(&self, data: &[u8]) {
        let Ok(line) = str::from_utf8(data) else {
            return;
        };
        let line = line.trim();
        if let Some(code) = parse_status_line(line) {
            self.status.set(code);
            self.retry_after.set(None);
            return;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("retry-after") {
                self.retry_after.set(parse_retry_after(value));
            }
        }
    }

    pub(crate) fn status(&self) -> u32 {
        self.status.get()
    }

    pub(crate) fn retry_after(&self) -> Option<Duration> {
        self.retry_after.get()
    }

    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status.get())
    }
}

fn parse_status_line(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("HTTP/")?;
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Delay-seconds form only; HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}
