//! # SIP Status Codes
//!
//! The subset of RFC 3261 status codes the switchboard sends or reacts to.
//! Anything else in the 100-699 range parses into [`StatusCode::Other`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// 100 Trying
    Trying,
    /// 180 Ringing
    Ringing,
    /// 183 Session Progress
    SessionProgress,
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 408 Request Timeout
    RequestTimeout,
    /// 480 Temporarily Unavailable
    TemporarilyUnavailable,
    /// 481 Call/Transaction Does Not Exist
    CallOrTransactionDoesNotExist,
    /// 486 Busy Here
    BusyHere,
    /// 487 Request Terminated
    RequestTerminated,
    /// 488 Not Acceptable Here
    NotAcceptableHere,
    /// 500 Server Internal Error
    ServerInternalError,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// 603 Decline
    Decline,
    /// Any other valid code
    Other(u16),
}

impl StatusCode {
    /// Creates a status code from a raw u16 value
    pub fn from_u16(code: u16) -> Result<Self> {
        Ok(match code {
            100 => StatusCode::Trying,
            180 => StatusCode::Ringing,
            183 => StatusCode::SessionProgress,
            200 => StatusCode::Ok,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            408 => StatusCode::RequestTimeout,
            480 => StatusCode::TemporarilyUnavailable,
            481 => StatusCode::CallOrTransactionDoesNotExist,
            486 => StatusCode::BusyHere,
            487 => StatusCode::RequestTerminated,
            488 => StatusCode::NotAcceptableHere,
            500 => StatusCode::ServerInternalError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            603 => StatusCode::Decline,
            100..=699 => StatusCode::Other(code),
            _ => return Err(Error::InvalidStatusCode(code)),
        })
    }

    /// Returns the numeric value of this status code
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Trying => 100,
            StatusCode::Ringing => 180,
            StatusCode::SessionProgress => 183,
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::RequestTimeout => 408,
            StatusCode::TemporarilyUnavailable => 480,
            StatusCode::CallOrTransactionDoesNotExist => 481,
            StatusCode::BusyHere => 486,
            StatusCode::RequestTerminated => 487,
            StatusCode::NotAcceptableHere => 488,
            StatusCode::ServerInternalError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::Decline => 603,
            StatusCode::Other(code) => *code,
        }
    }

    /// Returns the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Trying => "Trying",
            StatusCode::Ringing => "Ringing",
            StatusCode::SessionProgress => "Session Progress",
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::TemporarilyUnavailable => "Temporarily Unavailable",
            StatusCode::CallOrTransactionDoesNotExist => "Call/Transaction Does Not Exist",
            StatusCode::BusyHere => "Busy Here",
            StatusCode::RequestTerminated => "Request Terminated",
            StatusCode::NotAcceptableHere => "Not Acceptable Here",
            StatusCode::ServerInternalError => "Server Internal Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::Decline => "Decline",
            StatusCode::Other(_) => "Unknown",
        }
    }

    /// Returns true if this status code is provisional (1xx)
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    /// Returns true if this status code is success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Returns true for any final response (>= 200)
    pub fn is_final(&self) -> bool {
        self.as_u16() >= 200
    }

    /// Returns true if this status code indicates an error (4xx, 5xx, 6xx)
    pub fn is_error(&self) -> bool {
        (400..700).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

impl FromStr for StatusCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::InvalidFormat(format!("status code '{s}'")))?;
        StatusCode::from_u16(code)
    }
}
