use std::io;

use thiserror::Error;

/// Error type for RTP operations
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Invalid packet format
    #[error("Invalid RTP packet format: {0}")]
    InvalidPacket(String),

    /// Buffer too small
    #[error("Buffer too small for RTP packet: need {required} but have {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Invalid parameter for RTP operation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// IO error when sending/receiving RTP packets
    #[error("IO error: {0}")]
    IoError(String),

    /// Every port in the configured media range is taken
    #[error("No free RTP port in range {start}-{end}")]
    PortsExhausted { start: u16, end: u16 },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}
