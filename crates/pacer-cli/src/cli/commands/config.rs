//! `pacer config` – show where the config lives and what is in effect.

use anyhow::Result;
use pacer_core::config::{self, PacerConfig};
use pacer_core::logging;

pub fn run_config(cfg: &PacerConfig) -> Result<()> {
    println!("config: {}", config::config_path()?.display());
    if let Ok(path) = logging::log_file_path() {
        println!("log:    {}", path.display());
    }
    let key_state = if std::env::var_os(&cfg.api.api_key_env).is_some() {
        "set"
    } else {
        "not set"
    };
    println!("key:    ${} ({})", cfg.api.api_key_env, key_state);
    println!();
    print!("{}", cfg.to_toml_string()?);
    if cfg.retry.is_none() {
        let retry = cfg.retry_or_default();
        println!();
        println!(
            "# [retry] not set; using max_retries = {}, initial_delay_ms = {}, max_delay_ms = {}",
            retry.max_retries, retry.initial_delay_ms, retry.max_delay_ms
        );
    }
    Ok(())
}
