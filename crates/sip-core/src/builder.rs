//! Request and response construction helpers.
//!
//! Responses copy the dialog-identifying headers (Via, From, To, Call-ID, CSeq)
//! from the request they answer, as RFC 3261 §8.2.6 requires.

use uuid::Uuid;

use crate::header::{Header, HeaderName};
use crate::message::{HeaderAccess, Request, Response, BRANCH_MAGIC_COOKIE};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::{NameAddr, Uri};

/// Value used for the `Server` and `User-Agent` headers
pub const PRODUCT_NAME: &str = "switchboard";

/// Fresh RFC 3261 branch identifier
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, Uuid::new_v4().simple())
}

/// Fresh From/To tag
pub fn generate_tag() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Fresh Call-ID scoped to the given host
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), host)
}

/// Creates a response that mirrors the request's transaction headers
pub fn create_response(request: &Request, status: StatusCode) -> Response {
    let mut response = Response::new(status);
    for via in request.header_values(&HeaderName::Via) {
        response.headers.push(Header::new(HeaderName::Via, via));
    }
    for name in [HeaderName::From, HeaderName::To, HeaderName::CallId, HeaderName::CSeq] {
        if let Some(value) = request.header(&name) {
            response.headers.push(Header::new(name, value));
        }
    }
    response.headers.push(Header::new(HeaderName::Server, PRODUCT_NAME));
    response
}

/// Creates a response carrying a local To tag, unless the request already has one
pub fn create_response_with_tag(request: &Request, status: StatusCode, local_tag: &str) -> Response {
    let mut response = create_response(request, status);
    if request.to_tag().is_none() {
        if let Some(to) = request.header(&HeaderName::To) {
            let tagged = format!("{to};tag={local_tag}");
            response.set_header(HeaderName::To, tagged);
            reorder_after(&mut response, HeaderName::To, &HeaderName::From);
        }
    }
    response
}

fn reorder_after(response: &mut Response, name: HeaderName, anchor: &HeaderName) {
    let Some(pos) = response.headers.iter().position(|h| h.name == name) else {
        return;
    };
    let header = response.headers.remove(pos);
    let insert_at = response
        .headers
        .iter()
        .position(|h| &h.name == anchor)
        .map(|p| p + 1)
        .unwrap_or(response.headers.len());
    response.headers.insert(insert_at, header);
}

/// Everything needed to start a dialog from this side
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub local_addr: std::net::SocketAddr,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: String,
    pub cseq: u32,
}

/// Creates an out-of-dialog or in-dialog request with a fresh Via branch
pub fn create_request(method: Method, target: Uri, template: &RequestTemplate) -> Request {
    let via = format!(
        "SIP/2.0/UDP {};branch={};rport",
        template.local_addr,
        generate_branch()
    );
    let contact = NameAddr::new(Uri::sip(
        template.from.uri.user.as_deref(),
        template.local_addr.ip().to_string(),
        Some(template.local_addr.port()),
    ));
    Request::new(method.clone(), target)
        .with_header(HeaderName::Via, via)
        .with_header(HeaderName::MaxForwards, "70")
        .with_header(HeaderName::From, template.from.to_string())
        .with_header(HeaderName::To, template.to.to_string())
        .with_header(HeaderName::CallId, template.call_id.clone())
        .with_header(HeaderName::CSeq, format!("{} {}", template.cseq, method))
        .with_header(HeaderName::Contact, contact.to_string())
        .with_header(HeaderName::UserAgent, PRODUCT_NAME)
}

/// Builds the ACK for a 2xx, reusing the INVITE's CSeq number
pub fn create_ack_for_2xx(invite: &Request, response: &Response, local_addr: std::net::SocketAddr) -> Request {
    let target = response
        .contact()
        .map(|c| c.uri)
        .unwrap_or_else(|| invite.uri.clone());
    let seq = invite.cseq().map(|(seq, _)| seq).unwrap_or(1);
    let mut ack = Request::new(Method::Ack, target)
        .with_header(
            HeaderName::Via,
            format!("SIP/2.0/UDP {};branch={};rport", local_addr, generate_branch()),
        )
        .with_header(HeaderName::MaxForwards, "70");
    if let Some(from) = invite.header(&HeaderName::From) {
        ack = ack.with_header(HeaderName::From, from);
    }
    if let Some(to) = response.header(&HeaderName::To) {
        ack = ack.with_header(HeaderName::To, to);
    }
    if let Some(call_id) = invite.call_id() {
        ack = ack.with_header(HeaderName::CallId, call_id);
    }
    ack.with_header(HeaderName::CSeq, format!("{seq} ACK"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_message;
    use pretty_assertions::assert_eq;

    fn invite() -> Request {
        let raw = "INVITE sip:100@10.0.0.1 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bKabc\r\n\
            From: <sip:200@10.0.0.2>;tag=remote1\r\n\
            To: <sip:100@10.0.0.1>\r\n\
            Call-ID: call-1@10.0.0.2\r\n\
            CSeq: 1 INVITE\r\n\
            Content-Length: 0\r\n\r\n";
        parse_message(raw.as_bytes()).unwrap().into_request().unwrap()
    }

    #[test]
    fn test_response_mirrors_request() {
        let request = invite();
        let response = create_response(&request, StatusCode::Trying);
        assert_eq!(response.call_id(), Some("call-1@10.0.0.2"));
        assert_eq!(response.via_branch().as_deref(), Some("z9hG4bKabc"));
        assert_eq!(response.cseq(), Some((1, Method::Invite)));
        assert_eq!(response.to_tag(), None);
    }

    #[test]
    fn test_response_with_tag() {
        let request = invite();
        let response = create_response_with_tag(&request, StatusCode::Ok, "local9");
        assert_eq!(response.to_tag().as_deref(), Some("local9"));
        assert_eq!(response.from_tag().as_deref(), Some("remote1"));
    }

    #[test]
    fn test_generated_identifiers() {
        assert!(generate_branch().starts_with(BRANCH_MAGIC_COOKIE));
        assert_ne!(generate_tag(), generate_tag());
        assert!(generate_call_id("10.0.0.1").ends_with("@10.0.0.1"));
    }

    #[test]
    fn test_create_request_headers() {
        let template = RequestTemplate {
            local_addr: "10.0.0.1:5060".parse().unwrap(),
            from: NameAddr::new(Uri::sip(Some("100"), "10.0.0.1", None)).with_tag("t1"),
            to: NameAddr::new(Uri::sip(Some("300"), "10.0.0.3", None)),
            call_id: "abc@10.0.0.1".into(),
            cseq: 1,
        };
        let request = create_request(Method::Invite, template.to.uri.clone(), &template);
        assert_eq!(request.cseq(), Some((1, Method::Invite)));
        assert_eq!(request.from_tag().as_deref(), Some("t1"));
        assert!(request.via_branch().unwrap().starts_with(BRANCH_MAGIC_COOKIE));
        assert_eq!(request.contact().unwrap().uri.port, Some(5060));
    }
}
