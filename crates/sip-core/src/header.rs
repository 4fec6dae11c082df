use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Header names the switchboard reads or writes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    /// Call-ID: Unique identifier for this call
    CallId,
    /// Contact: Where subsequent requests should be sent
    Contact,
    /// Content-Length: Size of the message body
    ContentLength,
    /// Content-Type: Media type of the message body
    ContentType,
    /// CSeq: Command sequence number
    CSeq,
    /// From: Initiator of the request
    From,
    /// To: Logical recipient of the request
    To,
    /// Via: Path taken by the request so far
    Via,
    /// Max-Forwards: Limit on the number of proxies or gateways
    MaxForwards,
    /// Allow: Methods supported by the UA
    Allow,
    /// Accept: Media types acceptable for the response
    Accept,
    /// Expires: Expiration time for registration
    Expires,
    /// User-Agent: Product information
    UserAgent,
    /// Server: Product information in responses
    Server,
    /// Supported: Extensions supported by the UA
    Supported,
    /// Custom header name
    Other(String),
}

impl HeaderName {
    /// Returns the canonical name of the header
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::CallId => "Call-ID",
            HeaderName::Contact => "Contact",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::CSeq => "CSeq",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::Via => "Via",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::Allow => "Allow",
            HeaderName::Accept => "Accept",
            HeaderName::Expires => "Expires",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Server => "Server",
            HeaderName::Supported => "Supported",
            HeaderName::Other(s) => s,
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    /// Case-insensitive, accepting the RFC 3261 compact forms
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }
        Ok(match name.to_ascii_lowercase().as_str() {
            "call-id" | "i" => HeaderName::CallId,
            "contact" | "m" => HeaderName::Contact,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "cseq" => HeaderName::CSeq,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "via" | "v" => HeaderName::Via,
            "max-forwards" => HeaderName::MaxForwards,
            "allow" => HeaderName::Allow,
            "accept" => HeaderName::Accept,
            "expires" => HeaderName::Expires,
            "user-agent" => HeaderName::UserAgent,
            "server" => HeaderName::Server,
            "supported" | "k" => HeaderName::Supported,
            _ => HeaderName::Other(name.to_string()),
        })
    }
}

/// A single header line. Values are kept as raw text; typed access lives on the
/// message accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: HeaderName,
    pub value: String,
}

impl Header {
    pub fn new(name: HeaderName, value: impl Into<String>) -> Self {
        Self { name, value: value.into() }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Looks up a `;name=value` parameter in a header value, outside of any `<...>` URI.
///
/// A parameter without a value (`;lr`) yields `Some("")`.
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let tail = match value.rfind('>') {
        Some(idx) => &value[idx + 1..],
        None => value,
    };
    tail.split(';').skip(1).find_map(|part| {
        let mut kv = part.splitn(2, '=');
        let key = kv.next()?.trim();
        if key.eq_ignore_ascii_case(name) {
            Some(kv.next().map(|v| v.trim().trim_matches('"')).unwrap_or(""))
        } else {
            None
        }
    })
}
