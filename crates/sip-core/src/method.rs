use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP request methods handled by the switchboard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// INVITE: Initiates a session
    Invite,
    /// ACK: Acknowledges final responses to INVITE
    Ack,
    /// BYE: Terminates a session
    Bye,
    /// CANCEL: Cancels a pending request
    Cancel,
    /// REGISTER: Registers contact information
    Register,
    /// OPTIONS: Queries capabilities
    Options,
    /// INFO: Mid-call signaling (DTMF relay)
    Info,
    /// Any other method token, kept verbatim
    Extension(String),
}

impl Method {
    /// Returns the canonical token for this method
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Extension(token) => token,
        }
    }

    /// The verbs advertised in `Allow` headers
    pub fn supported() -> [Method; 7] {
        [
            Method::Invite,
            Method::Ack,
            Method::Bye,
            Method::Cancel,
            Method::Register,
            Method::Options,
            Method::Info,
        ]
    }

    /// Comma separated `Allow` header value
    pub fn allow_header_value() -> String {
        Self::supported()
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphanumeric() || b"-.!%*_+`'~".contains(&b)) {
            return Err(Error::InvalidMethod(s.to_string()));
        }
        Ok(match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "INFO" => Method::Info,
            other => Method::Extension(other.to_string()),
        })
    }
}
