//! Error handling for the codec library

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for codec operations
#[derive(Error, Debug)]
pub enum CodecError {
    /// Invalid audio format
    #[error("Invalid audio format: {details}")]
    InvalidFormat { details: String },

    /// Invalid sample rate
    #[error("Invalid sample rate: {rate}Hz")]
    InvalidSampleRate { rate: u32 },

    /// WAV container read/write failure
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Create an invalid format error
    pub fn invalid_format(details: impl Into<String>) -> Self {
        Self::InvalidFormat { details: details.into() }
    }
}
