//! Error types for the call engine.
//!
//! Only protocol-level failures are turned into SIP responses; everything else
//! is logged and absorbed by the caller (see the handlers in [`crate::protocol`]).

use std::io;

use thiserror::Error;

use crate::types::CallId;

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;

/// Error types for the call engine
#[derive(Debug, Error)]
pub enum CallEngineError {
    /// SIP grammar or message error
    #[error("SIP error: {0}")]
    Sip(#[from] switchboard_sip_core::Error),

    /// Signaling transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] switchboard_sip_transport::Error),

    /// RTP packet or socket failure
    #[error("RTP error: {0}")]
    Rtp(#[from] switchboard_rtp_core::Error),

    /// Audio conversion failure
    #[error("Codec error: {0}")]
    Codec(#[from] switchboard_codec_core::CodecError),

    /// Protocol violation by the peer
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No call with this identifier
    #[error("Call not found: {0}")]
    NotFound(CallId),

    /// Operation not valid in the call's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An exchange exceeded its ceiling
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Origination target resolves to this server
    #[error("Refusing to call own signaling address {0}")]
    SelfCall(std::net::SocketAddr),

    /// Recognizer, synthesizer or responder failure
    #[error("Speech service error: {0}")]
    Speech(String),

    /// Directory or call store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant broken
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallEngineError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn not_found(call_id: &CallId) -> Self {
        Self::NotFound(call_id.clone())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn speech(message: impl Into<String>) -> Self {
        Self::Speech(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<reqwest::Error> for CallEngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Speech(err.to_string())
    }
}

impl From<toml::de::Error> for CallEngineError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
