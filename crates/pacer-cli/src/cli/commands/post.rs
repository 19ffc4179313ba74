//! `pacer post <path>` – one JSON POST through the scheduler.

use anyhow::{Context, Result};
use pacer_core::config::PacerConfig;
use pacer_core::payload::Payload;
use pacer_core::scheduler::Scheduler;
use pacer_core::transport::HttpTransport;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::chat::cancel_on_ctrl_c;
use super::report::typed_error;

/// Parse `--body`, defaulting to an empty object.
pub(crate) fn parse_body(body: Option<&str>) -> Result<Value> {
    match body {
        Some(s) => serde_json::from_str(s).context("--body is not valid JSON"),
        None => Ok(Value::Object(Default::default())),
    }
}

pub async fn run_post(cfg: &PacerConfig, path: &str, body: Option<&str>, raw: bool) -> Result<()> {
    let body = parse_body(body)?;
    let transport = HttpTransport::from_config(&cfg.api)?;
    let scheduler = Scheduler::from_config(cfg);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let value = scheduler
        .submit_with_cancel(|| transport.post_json(path, &body), &cancel)
        .await
        .map_err(|e| typed_error(e, &cfg.api))?;

    if raw {
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    let text = Payload::Json(value)
        .into_text()
        .context("response has no text payload; rerun with --raw to see it")?;
    println!("{text}");
    Ok(())
}
