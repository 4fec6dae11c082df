use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP protocol handling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid SIP method
    #[error("Invalid SIP method: {0}")]
    InvalidMethod(String),

    /// Invalid SIP header syntax
    #[error("Invalid SIP header: {0}")]
    InvalidHeader(String),

    /// A header required by the operation is absent
    #[error("Missing SIP header: {0}")]
    MissingHeader(&'static str),

    /// Invalid SIP URI
    #[error("Invalid SIP URI: {0}")]
    InvalidUri(String),

    /// Invalid SIP version
    #[error("Invalid SIP version: {0}")]
    InvalidVersion(String),

    /// Invalid status code
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Invalid session description
    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    /// Parser error
    #[error("Parser error: {0}")]
    Parser(String),
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        Error::Parser(format!("Parsing failed: {err}"))
    }
}
