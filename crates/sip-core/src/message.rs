use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::header::{header_param, Header, HeaderName};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::{NameAddr, Uri};

/// SIP protocol version token
pub const SIP_VERSION: &str = "SIP/2.0";

/// Magic cookie every RFC 3261 branch starts with
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Header access shared by requests and responses
pub trait HeaderAccess {
    fn headers(&self) -> &[Header];
    fn headers_mut(&mut self) -> &mut Vec<Header>;

    /// First value of the named header
    fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers()
            .iter()
            .find(|h| &h.name == name)
            .map(|h| h.value.as_str())
    }

    /// All values of the named header, in message order
    fn header_values(&self, name: &HeaderName) -> Vec<&str> {
        self.headers()
            .iter()
            .filter(|h| &h.name == name)
            .map(|h| h.value.as_str())
            .collect()
    }

    /// Replaces every occurrence of the header with a single value
    fn set_header(&mut self, name: HeaderName, value: impl Into<String>) {
        let headers = self.headers_mut();
        headers.retain(|h| h.name != name);
        headers.push(Header::new(name, value));
    }

    fn call_id(&self) -> Option<&str> {
        self.header(&HeaderName::CallId).map(str::trim)
    }

    /// CSeq sequence number and method
    fn cseq(&self) -> Option<(u32, Method)> {
        let value = self.header(&HeaderName::CSeq)?;
        let mut parts = value.split_whitespace();
        let seq = parts.next()?.parse().ok()?;
        let method = parts.next()?.parse().ok()?;
        Some((seq, method))
    }

    fn from_addr(&self) -> Option<NameAddr> {
        self.header(&HeaderName::From)?.parse().ok()
    }

    fn to_addr(&self) -> Option<NameAddr> {
        self.header(&HeaderName::To)?.parse().ok()
    }

    fn from_tag(&self) -> Option<String> {
        self.header(&HeaderName::From)
            .and_then(|v| header_param(v, "tag"))
            .map(str::to_string)
    }

    fn to_tag(&self) -> Option<String> {
        self.header(&HeaderName::To)
            .and_then(|v| header_param(v, "tag"))
            .map(str::to_string)
    }

    /// Branch parameter of the top-most Via
    fn via_branch(&self) -> Option<String> {
        self.header(&HeaderName::Via)
            .and_then(|v| header_param(v, "branch"))
            .map(str::to_string)
    }

    /// First Contact URI (`*` yields `None`)
    fn contact(&self) -> Option<NameAddr> {
        let value = self.header(&HeaderName::Contact)?;
        if value.trim() == "*" {
            return None;
        }
        // Only the first entry of a comma separated list
        let first = value.split(',').next().unwrap_or(value);
        first.parse().ok()
    }

    fn content_type(&self) -> Option<&str> {
        self.header(&HeaderName::ContentType).map(str::trim)
    }

    fn expires(&self) -> Option<u32> {
        self.header(&HeaderName::Expires)?.trim().parse().ok()
    }
}

/// A SIP request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self { method, uri, headers: Vec::new(), body: Bytes::new() }
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.set_header(HeaderName::ContentType, content_type);
        self.body = body.into();
        self
    }

    /// Body as UTF-8 text, if it is valid
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Serializes the request, writing a fresh Content-Length
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(512 + self.body.len());
        buf.put_slice(format!("{} {} {}\r\n", self.method, self.uri, SIP_VERSION).as_bytes());
        write_headers_and_body(&mut buf, &self.headers, &self.body);
        buf.freeze()
    }
}

impl HeaderAccess for Request {
    fn headers(&self) -> &[Header] {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
}

/// A SIP response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, reason: None, headers: Vec::new(), body: Bytes::new() }
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.set_header(HeaderName::ContentType, content_type);
        self.body = body.into();
        self
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn reason_phrase(&self) -> &str {
        self.reason.as_deref().unwrap_or_else(|| self.status.reason_phrase())
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(512 + self.body.len());
        buf.put_slice(
            format!("{} {} {}\r\n", SIP_VERSION, self.status.as_u16(), self.reason_phrase()).as_bytes(),
        );
        write_headers_and_body(&mut buf, &self.headers, &self.body);
        buf.freeze()
    }
}

impl HeaderAccess for Response {
    fn headers(&self) -> &[Header] {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
}

fn write_headers_and_body(buf: &mut BytesMut, headers: &[Header], body: &Bytes) {
    for header in headers.iter().filter(|h| h.name != HeaderName::ContentLength) {
        buf.put_slice(format!("{}: {}\r\n", header.name, header.value).as_bytes());
    }
    buf.put_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    buf.put_slice(body);
}

/// Either side of a SIP exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(r) => r.to_bytes(),
            Message::Response(r) => r.to_bytes(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            Message::Request(r) => r.call_id(),
            Message::Response(r) => r.call_id(),
        }
    }

    pub fn into_request(self) -> Result<Request> {
        match self {
            Message::Request(r) => Ok(r),
            Message::Response(_) => Err(Error::InvalidFormat("expected a request".to_string())),
        }
    }

    pub fn into_response(self) -> Result<Response> {
        match self {
            Message::Response(r) => Ok(r),
            Message::Request(_) => Err(Error::InvalidFormat("expected a response".to_string())),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
