//! HTTP transport for JSON and streaming endpoints.
//!
//! Uses the curl crate (libcurl). Each request runs on the blocking pool via
//! `spawn_blocking`; failures come back as [`RawFailure`] so the scheduler can
//! classify and retry them.

mod headers;
mod stream;

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use url::Url;

use crate::config::ApiConfig;
use crate::retry::RawFailure;

use headers::ResponseHead;
pub use stream::ChunkReceiver;

/// Streamed chunks buffered between the curl thread and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    base: Url,
    api_key: Option<String>,
    timeout: Duration,
    connect_timeout: Duration,
}

/// Everything curl needs for one attempt; moved onto the blocking thread.
#[derive(Debug, Clone)]
struct Prepared {
    url: String,
    body: Vec<u8>,
    headers: Vec<String>,
    timeout: Duration,
    connect_timeout: Duration,
    streaming: bool,
}

impl HttpTransport {
    /// Build from config, reading the key from `api.api_key_env` if set.
    pub fn from_config(api: &ApiConfig) -> Result<Self> {
        let api_key = std::env::var(&api.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::debug!(env = %api.api_key_env, "no API key in environment");
        }
        Ok(Self::new(&api.base_url, api_key)?.with_timeouts(
            Duration::from_secs(api.timeout_secs),
            Duration::from_secs(api.connect_timeout_secs),
        ))
    }

    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let mut base =
            Url::parse(base_url).with_context(|| format!("invalid base URL {base_url}"))?;
        // Without a trailing slash `join` would replace the last segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            api_key,
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(15),
        })
    }

    pub fn with_timeouts(mut self, timeout: Duration, connect_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve an endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, RawFailure> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(RawFailure::Invalid {
                field: Some("path".to_string()),
                message: "endpoint path is empty".to_string(),
            });
        }
        self.base.join(path).map_err(|e| RawFailure::Invalid {
            field: Some("path".to_string()),
            message: format!("cannot join {path:?} onto {}: {e}", self.base),
        })
    }

    /// POST `body` and decode the JSON response.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, RawFailure> {
        let req = self.prepare(path, body, false)?;
        tracing::debug!(url = %req.url, "POST");
        tokio::task::spawn_blocking(move || perform_json(&req))
            .await
            .map_err(|e| RawFailure::NoResponse {
                timed_out: false,
                message: format!("transport task failed: {e}"),
            })?
    }

    /// POST `body` and stream server-sent events back.
    ///
    /// Resolves once the response status is known: non-2xx responses fail
    /// here (and can be retried), 2xx responses yield a [`ChunkReceiver`].
    /// Dropping the receiver aborts the transfer.
    pub async fn post_stream(&self, path: &str, body: &Value) -> Result<ChunkReceiver, RawFailure> {
        let req = self.prepare(path, body, true)?;
        tracing::debug!(url = %req.url, "POST (stream)");
        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        tokio::task::spawn_blocking(move || stream::perform_stream(&req, ready_tx, tx));
        match ready_rx.await {
            Ok(Ok(())) => Ok(ChunkReceiver::new(rx)),
            Ok(Err(raw)) => Err(raw),
            Err(_) => Err(RawFailure::NoResponse {
                timed_out: false,
                message: "stream worker exited before the response".to_string(),
            }),
        }
    }

    fn prepare(&self, path: &str, body: &Value, streaming: bool) -> Result<Prepared, RawFailure> {
        let url = self.endpoint(path)?;
        let body = serde_json::to_vec(body).map_err(|e| RawFailure::Invalid {
            field: Some("body".to_string()),
            message: e.to_string(),
        })?;
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };
        let mut headers = vec![
            "Content-Type: application/json".to_string(),
            format!("Accept: {accept}"),
        ];
        if let Some(key) = &self.api_key {
            headers.push(format!("Authorization: Bearer {}", key.trim()));
        }
        Ok(Prepared {
            url: url.to_string(),
            body,
            headers,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            streaming,
        })
    }
}

impl Prepared {
    fn easy(&self) -> Result<curl::easy::Easy, curl::Error> {
        let mut easy = curl::easy::Easy::new();
        easy.url(&self.url)?;
        easy.post(true)?;
        easy.post_fields_copy(&self.body)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.connect_timeout)?;
        if self.streaming {
            // Streams may run long; only a stalled stream times out.
            easy.low_speed_limit(1)?;
            easy.low_speed_time(self.timeout)?;
            // Enables the progress callback, which also fires while idle.
            easy.progress(true)?;
        } else {
            easy.timeout(self.timeout)?;
        }
        let mut list = curl::easy::List::new();
        for h in &self.headers {
            list.append(h)?;
        }
        easy.http_headers(list)?;
        Ok(easy)
    }
}

fn curl_failure(e: &curl::Error) -> RawFailure {
    RawFailure::NoResponse {
        timed_out: e.is_operation_timedout(),
        message: e.to_string(),
    }
}

fn status_failure(head: &ResponseHead, body: &[u8]) -> RawFailure {
    RawFailure::Status {
        status: u16::try_from(head.status()).unwrap_or(u16::MAX),
        body: String::from_utf8_lossy(body).into_owned(),
        retry_after: head.retry_after(),
    }
}

/// Drive one transfer, recording headers into `head` and handing body bytes
/// to `on_body`. Returning fewer bytes than given aborts the transfer, as does
/// `keep_going` returning false (polled only when progress is enabled).
fn run_transfer(
    easy: &mut curl::easy::Easy,
    head: &ResponseHead,
    mut keep_going: impl FnMut() -> bool,
    mut on_body: impl FnMut(&[u8]) -> usize,
) -> Result<(), curl::Error> {
    let mut transfer = easy.transfer();
    transfer.header_function(|data| {
        head.record(data);
        true
    })?;
    transfer.progress_function(|_, _, _, _| keep_going())?;
    transfer.write_function(|data| Ok(on_body(data)))?;
    transfer.perform()
}

fn perform_json(req: &Prepared) -> Result<Value, RawFailure> {
    let mut easy = req.easy().map_err(|e| curl_failure(&e))?;
    let head = ResponseHead::default();
    let mut body = Vec::new();
    run_transfer(&mut easy, &head, || true, |data| {
        body.extend_from_slice(data);
        data.len()
    })
    .map_err(|e| curl_failure(&e))?;

    if !head.is_success() {
        return Err(status_failure(&head, &body));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&body).map_err(|e| RawFailure::MalformedBody(e.to_string()))
}
