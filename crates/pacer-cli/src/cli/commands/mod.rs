//! CLI command handlers. Each command is in its own file.

mod chat;
mod completions;
mod config;
mod post;
mod report;

pub use chat::{run_chat, ChatOptions};
pub use completions::run_completions;
pub use config::run_config;
pub use post::run_post;
