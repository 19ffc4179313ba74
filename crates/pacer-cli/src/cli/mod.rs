//! CLI for the pacer inference API client.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use pacer_core::config::{self, PacerConfig, SchedulerConfig};

use commands::{run_chat, run_completions, run_config, run_post, ChatOptions};

/// Top-level CLI for pacer.
#[derive(Debug, Parser)]
#[command(name = "pacer")]
#[command(about = "pacer: rate-limited, retrying client for LLM inference APIs", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub limits: LimitArgs,

    #[command(subcommand)]
    pub command: CliCommand,
}

/// Per-run overrides of the `[scheduler]` config section.
#[derive(Debug, Default, Clone, Copy, Args)]
pub struct LimitArgs {
    /// Maximum requests in flight at once.
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Maximum request starts per trailing 60 seconds.
    #[arg(long, global = true, value_name = "N")]
    pub rpm: Option<usize>,
}

impl LimitArgs {
    pub fn apply(self, base: SchedulerConfig) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent.unwrap_or(base.max_concurrent),
            requests_per_minute: self.rpm.unwrap_or(base.requests_per_minute),
        }
        .normalized()
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Send a prompt to a chat endpoint and print the reply as it streams.
    Chat {
        /// User message.
        prompt: String,

        /// Model name (defaults to `api.model` from the config).
        #[arg(long)]
        model: Option<String>,

        /// Wait for the whole response instead of streaming.
        #[arg(long)]
        no_stream: bool,

        /// Stop after N streamed chunks.
        #[arg(long, value_name = "N")]
        max_chunks: Option<usize>,

        /// Print each raw chunk to stderr as it arrives.
        #[arg(long)]
        show_chunks: bool,

        /// Endpoint path, relative to `api.base_url`.
        #[arg(long, default_value = "chat/completions")]
        path: String,
    },

    /// POST a JSON body to an endpoint and print the text payload of the reply.
    Post {
        /// Endpoint path, relative to `api.base_url`.
        path: String,

        /// Request body as JSON (default `{}`).
        #[arg(long, value_name = "JSON")]
        body: Option<String>,

        /// Print the full JSON response instead of its text payload.
        #[arg(long)]
        raw: bool,
    },

    /// Show the config file location and effective settings.
    Config,

    /// Generate shell completions on stdout.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Config from disk with the command-line limit overrides applied.
fn load_config(limits: LimitArgs) -> Result<PacerConfig> {
    let mut cfg = config::load_or_init()?;
    cfg.scheduler = limits.apply(cfg.scheduler);
    tracing::debug!("loaded config: {:?}", cfg);
    Ok(cfg)
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let limits = cli.limits;

        match cli.command {
            CliCommand::Chat {
                prompt,
                model,
                no_stream,
                max_chunks,
                show_chunks,
                path,
            } => {
                let cfg = load_config(limits)?;
                let opts = ChatOptions {
                    prompt,
                    model,
                    stream: !no_stream,
                    max_chunks,
                    show_chunks,
                    path,
                };
                run_chat(&cfg, opts).await?;
            }
            CliCommand::Post { path, body, raw } => {
                let cfg = load_config(limits)?;
                run_post(&cfg, &path, body.as_deref(), raw).await?;
            }
            CliCommand::Config => run_config(&load_config(limits)?)?,
            CliCommand::Completions { shell } => run_completions(shell),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
