use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP transport operations
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to bind the socket
    #[error("Failed to bind to address {0}: {1}")]
    BindFailed(SocketAddr, #[source] std::io::Error),

    /// Socket-level I/O failure
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The encoded message does not fit in one datagram
    #[error("Message too large for UDP: {0} bytes")]
    MessageTooLarge(usize),

    /// Send attempted after close
    #[error("Transport closed")]
    TransportClosed,

    /// Destination could not be resolved
    #[error("Invalid destination: {0}")]
    InvalidAddress(String),
}
