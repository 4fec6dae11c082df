//! Shared infrastructure for the switchboard crates.

pub mod errors;
pub mod logging;

pub use errors::{Error, Result};
pub use logging::{call_span, log_welcome, parse_log_level, setup_logging, LoggingConfig};
