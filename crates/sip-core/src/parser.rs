//! Datagram-oriented SIP message parser.
//!
//! One UDP datagram carries exactly one message, so the parser works on a complete
//! buffer: start line, header block (with RFC 3261 line folding), then a body whose
//! length is bounded by `Content-Length`.

use bytes::Bytes;
use nom::{
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{map_res, rest},
    sequence::{separated_pair, terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::header::{Header, HeaderName};
use crate::message::{Message, Request, Response, SIP_VERSION};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::Uri;

/// Maximum header count for SIP messages
pub const MAX_HEADER_COUNT: usize = 100;

/// Maximum accepted datagram size
pub const MAX_MESSAGE_SIZE: usize = 65_535;

enum StartLine {
    Request(Method, Uri),
    Response(StatusCode, String),
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn request_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    tuple((terminated(token, space1), terminated(token, space1), token))(input)
}

fn status_line(input: &str) -> IResult<&str, (u16, &str)> {
    let (input, _) = terminated(tag(SIP_VERSION), space1)(input)?;
    let (input, code) = map_res(digit1, str::parse::<u16>)(input)?;
    let (input, _) = space0(input)?;
    let (input, reason) = rest(input)?;
    Ok((input, (code, reason)))
}

fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_till1(|c: char| c == ':'),
        tuple((char(':'), space0)),
        rest,
    )(input)
}

fn parse_start_line(line: &str) -> Result<StartLine> {
    if line.starts_with(SIP_VERSION) {
        let (_, (code, reason)) = status_line(line)?;
        return Ok(StartLine::Response(StatusCode::from_u16(code)?, reason.trim().to_string()));
    }

    let (_, (method, uri, version)) = request_line(line)?;
    if version != SIP_VERSION {
        return Err(Error::InvalidVersion(version.to_string()));
    }
    Ok(StartLine::Request(method.parse()?, uri.parse()?))
}

/// Unfolds continuation lines and splits the header block into headers
fn parse_headers(block: &str) -> Result<Vec<Header>> {
    let mut logical: Vec<String> = Vec::new();
    for line in block.lines() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match logical.last_mut() {
                Some(prev) => {
                    prev.push(' ');
                    prev.push_str(line.trim());
                }
                None => return Err(Error::InvalidHeader(format!("orphan continuation line '{line}'"))),
            }
        } else {
            logical.push(line.to_string());
        }
    }

    if logical.len() > MAX_HEADER_COUNT {
        return Err(Error::InvalidFormat(format!("too many headers ({})", logical.len())));
    }

    logical
        .iter()
        .map(|line| {
            let (_, (name, value)) =
                header_line(line).map_err(|_| Error::InvalidHeader(line.clone()))?;
            Ok(Header::new(name.parse::<HeaderName>()?, value.trim()))
        })
        .collect()
}

/// Parses one complete SIP message
pub fn parse_message(data: &[u8]) -> Result<Message> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidFormat(format!("message too large ({} bytes)", data.len())));
    }

    // Tolerate leading CRLF keep-alives
    let start = data.iter().position(|b| *b != b'\r' && *b != b'\n').unwrap_or(data.len());
    let data = &data[start..];

    let (head_end, body_start) = find_head_end(data)
        .ok_or_else(|| Error::InvalidFormat("missing header terminator".to_string()))?;
    let head = std::str::from_utf8(&data[..head_end])
        .map_err(|_| Error::InvalidFormat("header block is not UTF-8".to_string()))?;

    let (start_line, header_block) = head.split_once('\n').unwrap_or((head, ""));
    let start_line = parse_start_line(start_line.trim_end_matches('\r'))?;
    let headers = parse_headers(header_block)?;

    let available = &data[body_start..];
    let content_length = headers
        .iter()
        .find(|h| h.name == HeaderName::ContentLength)
        .map(|h| {
            h.value
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::InvalidHeader(format!("Content-Length: {}", h.value)))
        })
        .transpose()?;

    let body = match content_length {
        Some(len) if len > available.len() => {
            return Err(Error::InvalidFormat(format!(
                "Content-Length {len} exceeds the {} body bytes received",
                available.len()
            )))
        }
        Some(len) => Bytes::copy_from_slice(&available[..len]),
        None => Bytes::copy_from_slice(available),
    };

    Ok(match start_line {
        StartLine::Request(method, uri) => Message::Request(Request { method, uri, headers, body }),
        StartLine::Response(status, reason) => Message::Response(Response {
            status,
            reason: (!reason.is_empty()).then_some(reason),
            headers,
            body,
        }),
    })
}

/// Returns (end of header block, start of body)
fn find_head_end(data: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    data.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, pos + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HeaderAccess;
    use pretty_assertions::assert_eq;

    const INVITE: &str = "INVITE sip:bob@192.168.1.2 SIP/2.0\r\n\
        Via: SIP/2.0/UDP 192.168.1.1:5060;branch=z9hG4bK74bf9\r\n\
        Max-Forwards: 70\r\n\
        From: Alice <sip:alice@192.168.1.1>;tag=9fxced76sl\r\n\
        To: Bob <sip:bob@192.168.1.2>\r\n\
        Call-ID: 3848276298220188511@192.168.1.1\r\n\
        CSeq: 1 INVITE\r\n\
        Subject: a very\r\n long subject\r\n\
        Content-Type: application/sdp\r\n\
        Content-Length: 4\r\n\
        \r\n\
        v=0\n";

    #[test]
    fn test_parse_invite() {
        let message = parse_message(INVITE.as_bytes()).unwrap();
        let request = message.into_request().unwrap();
        assert_eq!(request.method, Method::Invite);
        assert_eq!(request.uri.user.as_deref(), Some("bob"));
        assert_eq!(request.call_id(), Some("3848276298220188511@192.168.1.1"));
        assert_eq!(request.cseq(), Some((1, Method::Invite)));
        assert_eq!(request.from_tag().as_deref(), Some("9fxced76sl"));
        assert_eq!(request.to_tag(), None);
        assert_eq!(request.via_branch().as_deref(), Some("z9hG4bK74bf9"));
        assert_eq!(
            request.header(&HeaderName::Other("Subject".into())),
            Some("a very long subject")
        );
        assert_eq!(&request.body[..], b"v=0\n");
    }

    #[test]
    fn test_parse_response() {
        let raw = "SIP/2.0 180 Ringing\r\nCall-ID: abc\r\nCSeq: 7 INVITE\r\nTo: <sip:b@h>;tag=xyz\r\n\r\n";
        let response = parse_message(raw.as_bytes()).unwrap().into_response().unwrap();
        assert_eq!(response.status, StatusCode::Ringing);
        assert_eq!(response.reason_phrase(), "Ringing");
        assert_eq!(response.to_tag().as_deref(), Some("xyz"));
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_reject_malformed() {
        assert!(parse_message(b"garbage").is_err());
        assert!(parse_message(b"INVITE sip:bob@h SIP/3.0\r\n\r\n").is_err());
        let short_body = "OPTIONS sip:h SIP/2.0\r\nContent-Length: 20\r\n\r\nabc";
        assert!(parse_message(short_body.as_bytes()).is_err());
    }

    #[test]
    fn test_serialize_then_parse_keeps_headers() {
        let request = parse_message(INVITE.as_bytes()).unwrap().into_request().unwrap();
        let reparsed = parse_message(&request.to_bytes()).unwrap().into_request().unwrap();
        assert_eq!(reparsed.headers.len(), request.headers.len());
        assert_eq!(reparsed.body, request.body);
    }
}
