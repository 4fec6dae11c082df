use thiserror::Error;

/// Result type for infrastructure helpers
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    LoggingInitialized(String),
}
