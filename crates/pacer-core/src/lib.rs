pub mod clock;
pub mod config;
pub mod logging;
pub mod payload;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod sse;
pub mod transport;
