pub mod context;
pub mod setup;

pub use context::call_span;
pub use setup::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
