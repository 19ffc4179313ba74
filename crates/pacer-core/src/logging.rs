//! Tracing setup for the CLI and for embedders that want pacer's defaults.
//!
//! Lines go to `$XDG_STATE_HOME/pacer/pacer.log` without ANSI colours.
//! `RUST_LOG` replaces the default directives; a value that does not parse is
//! reported once and the defaults are used instead.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset, blank or unparsable.
pub const DEFAULT_DIRECTIVES: &str = "info,pacer=debug,pacer_core=debug";

/// Filter for an optional `RUST_LOG` value, plus a warning if it was rejected.
fn resolve_filter(directives: Option<&str>) -> (EnvFilter, Option<String>) {
    let Some(directives) = directives.map(str::trim).filter(|s| !s.is_empty()) else {
        return (EnvFilter::new(DEFAULT_DIRECTIVES), None);
    };
    match EnvFilter::try_new(directives) {
        Ok(filter) => (filter, None),
        Err(e) => (
            EnvFilter::new(DEFAULT_DIRECTIVES),
            Some(format!("ignoring {}={directives:?}: {e}", EnvFilter::DEFAULT_ENV)),
        ),
    }
}

fn filter_from_env() -> (EnvFilter, Option<String>) {
    resolve_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

/// Path of the log file; the parent directory is created.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pacer")?;
    Ok(xdg_dirs.place_state_file("pacer.log")?)
}

/// Install a subscriber appending to [`log_file_path`] and return that path.
///
/// Errors (unwritable state dir, subscriber already set) leave the process
/// without a subscriber so the caller can fall back to [`init_logging_stderr`].
pub fn init_logging() -> Result<PathBuf> {
    let path = log_file_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    let (filter, rejected) = filter_from_env();
    // `&File` is `Write`, so every event writes through the one shared handle.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install tracing subscriber: {e}"))?;

    if let Some(warning) = rejected {
        tracing::warn!("{warning}");
    }
    tracing::info!(path = %path.display(), "pacer logging initialized");
    Ok(path)
}

/// Log to stderr instead of a file. Does nothing if a subscriber is already set.
pub fn init_logging_stderr() {
    let (filter, rejected) = filter_from_env();
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_ok();
    if let (true, Some(warning)) = (installed, rejected) {
        tracing::warn!("{warning}");
    }
}
