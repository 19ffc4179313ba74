//! `pacer chat <prompt>` – stream a chat completion to stdout.

use std::io::Write;

use anyhow::Result;
use pacer_core::config::PacerConfig;
use pacer_core::pipeline::{collect_with, deltas, source, take, tap, Chunk, ChunkStream, Item};
use pacer_core::retry::{ErrorKind, TypedError};
use pacer_core::scheduler::Scheduler;
use pacer_core::transport::HttpTransport;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::report::typed_error;

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub prompt: String,
    pub model: Option<String>,
    pub stream: bool,
    pub max_chunks: Option<usize>,
    pub show_chunks: bool,
    pub path: String,
}

/// Chat-completions request body for a single user message.
pub(crate) fn request_body(model: &str, prompt: &str, stream: bool) -> Value {
    json!({
        "model": model,
        "stream": stream,
        "messages": [{ "role": "user", "content": prompt }],
    })
}

/// Cancel `cancel` on the first Ctrl-C.
pub(crate) fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling");
            cancel.cancel();
        }
    });
}

pub async fn run_chat(cfg: &PacerConfig, opts: ChatOptions) -> Result<()> {
    let transport = HttpTransport::from_config(&cfg.api)?;
    let scheduler = Scheduler::from_config(cfg);
    let model = opts.model.as_deref().unwrap_or(&cfg.api.model);
    let body = request_body(model, &opts.prompt, opts.stream);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = if opts.stream {
        stream_reply(&scheduler, &transport, &opts, &body, &cancel).await
    } else {
        scheduler
            .submit_with_cancel(|| transport.post_json(&opts.path, &body), &cancel)
            .await
            .map(|value| {
                let chunk = Chunk::new(value);
                match chunk.delta() {
                    "" => println!("{:#}", chunk.data),
                    text => println!("{text}"),
                }
            })
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind == ErrorKind::Cancelled => {
            eprintln!("cancelled");
            Ok(())
        }
        Err(e) => Err(typed_error(e, &cfg.api)),
    }
}

async fn stream_reply(
    scheduler: &Scheduler,
    transport: &HttpTransport,
    opts: &ChatOptions,
    body: &Value,
    cancel: &CancellationToken,
) -> Result<(), TypedError> {
    let rx = scheduler
        .submit_with_cancel(|| transport.post_stream(&opts.path, body), cancel)
        .await?;

    let show_chunks = opts.show_chunks;
    let seq = tap(source(rx, cancel.clone()), move |c: &Chunk| {
        if show_chunks {
            eprintln!("[chunk] {}", c.data);
        }
        Ok(())
    });
    let seq = deltas(take(seq, opts.max_chunks.unwrap_or(usize::MAX)));

    let (written, interrupted) =
        write_until_cancelled(seq, cancel, &mut std::io::stdout()).await?;
    println!();

    if interrupted {
        eprintln!("(stopped after {written} characters)");
    }
    tracing::debug!(chars = written, "chat reply complete");
    Ok(())
}

/// Write each delta to `out` as it arrives. Returns the characters written and
/// whether `cancel` fired; a pull stalled on the network does not delay that.
pub(crate) async fn write_until_cancelled<S, W>(
    seq: S,
    cancel: &CancellationToken,
    out: &mut W,
) -> Result<(usize, bool), TypedError>
where
    S: ChunkStream<Item = Item<String>>,
    W: Write,
{
    let mut written = 0usize;
    let collected = collect_with(seq, |delta: &String, _| {
        written += delta.chars().count();
        let _ = write!(out, "{delta}");
        let _ = out.flush();
    });
    let interrupted = tokio::select! {
        res = collected => {
            res?;
            cancel.is_cancelled()
        }
        _ = cancel.cancelled() => true,
    };
    Ok((written, interrupted))
}
