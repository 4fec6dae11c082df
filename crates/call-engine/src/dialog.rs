//! Dialog state kept per call, and construction of the in-dialog and
//! transaction-bound requests call control sends (BYE, CANCEL, ACK for errors).

use std::net::SocketAddr;

use switchboard_sip_core::prelude::*;

use crate::types::CallId;

/// Both ends of an established (or early) dialog
#[derive(Debug, Clone, PartialEq)]
pub struct Dialog {
    pub call_id: CallId,
    /// Our From/To value, carrying our tag
    pub local: NameAddr,
    /// The peer's From/To value, carrying its tag once known
    pub remote: NameAddr,
    /// Request-URI for in-dialog requests
    pub remote_target: Uri,
    /// Where in-dialog requests are sent
    pub peer: SocketAddr,
    next_cseq: u32,
}

impl Dialog {
    /// Dialog for an INVITE we answer; `local_tag` goes into our To
    pub fn for_inbound(invite: &Request, source: SocketAddr, local_tag: &str) -> Option<Self> {
        let call_id = invite.call_id()?;
        let remote = invite.from_addr()?;
        let mut local = invite.to_addr()?;
        local.tag = Some(local_tag.to_string());
        let remote_target = invite.contact().map(|c| c.uri).unwrap_or_else(|| remote.uri.clone());
        Some(Self {
            call_id: CallId::from(call_id),
            local,
            remote,
            remote_target,
            peer: source,
            next_cseq: 1,
        })
    }

    /// Dialog for an INVITE we sent, confirmed by a 2xx
    pub fn for_outbound(invite: &Request, response: &Response, peer: SocketAddr) -> Option<Self> {
        let call_id = invite.call_id()?;
        let local = invite.from_addr()?;
        let remote = response.to_addr()?;
        let remote_target = response.contact().map(|c| c.uri).unwrap_or_else(|| invite.uri.clone());
        let invite_seq = invite.cseq().map(|(seq, _)| seq).unwrap_or(1);
        Some(Self {
            call_id: CallId::from(call_id),
            local,
            remote,
            remote_target,
            peer,
            next_cseq: invite_seq + 1,
        })
    }

    /// Builds the next in-dialog request, consuming a CSeq number
    pub fn create_request(&mut self, method: Method, local_addr: SocketAddr) -> Request {
        let template = RequestTemplate {
            local_addr,
            from: self.local.clone(),
            to: self.remote.clone(),
            call_id: self.call_id.to_string(),
            cseq: self.next_cseq,
        };
        self.next_cseq += 1;
        create_request(method, self.remote_target.clone(), &template)
    }

    pub fn create_bye(&mut self, local_addr: SocketAddr) -> Request {
        self.create_request(Method::Bye, local_addr)
    }
}

/// CANCEL for a pending INVITE: same Request-URI, top Via, From, To, Call-ID and CSeq number
pub fn create_cancel(invite: &Request) -> Request {
    let mut cancel = Request::new(Method::Cancel, invite.uri.clone());
    if let Some(via) = invite.header(&HeaderName::Via) {
        cancel = cancel.with_header(HeaderName::Via, via);
    }
    cancel = cancel.with_header(HeaderName::MaxForwards, "70");
    for name in [HeaderName::From, HeaderName::To, HeaderName::CallId] {
        if let Some(value) = invite.header(&name) {
            cancel = cancel.with_header(name, value);
        }
    }
    let seq = invite.cseq().map(|(seq, _)| seq).unwrap_or(1);
    cancel.with_header(HeaderName::CSeq, format!("{seq} CANCEL"))
}

/// ACK for a non-2xx final response; part of the INVITE transaction, so it reuses the INVITE's Via
pub fn create_ack_for_error(invite: &Request, response: &Response) -> Request {
    let mut ack = Request::new(Method::Ack, invite.uri.clone());
    if let Some(via) = invite.header(&HeaderName::Via) {
        ack = ack.with_header(HeaderName::Via, via);
    }
    ack = ack.with_header(HeaderName::MaxForwards, "70");
    if let Some(from) = invite.header(&HeaderName::From) {
        ack = ack.with_header(HeaderName::From, from);
    }
    if let Some(to) = response.header(&HeaderName::To) {
        ack = ack.with_header(HeaderName::To, to);
    }
    if let Some(call_id) = invite.call_id() {
        ack = ack.with_header(HeaderName::CallId, call_id);
    }
    let seq = invite.cseq().map(|(seq, _)| seq).unwrap_or(1);
    ack.with_header(HeaderName::CSeq, format!("{seq} ACK"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn local() -> SocketAddr {
        "10.0.0.1:5060".parse().unwrap()
    }

    fn invite() -> Request {
        let raw = "INVITE sip:100@10.0.0.1 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 10.0.0.2:5062;branch=z9hG4bKinv1\r\n\
            From: <sip:alice@10.0.0.2>;tag=alice1\r\n\
            To: <sip:100@10.0.0.1>\r\n\
            Call-ID: dlg-1@10.0.0.2\r\n\
            CSeq: 7 INVITE\r\n\
            Contact: <sip:alice@10.0.0.2:5062>\r\n\r\n";
        parse_message(raw.as_bytes()).unwrap().into_request().unwrap()
    }

    #[test]
    fn test_inbound_bye_swaps_roles() {
        let source: SocketAddr = "10.0.0.2:5062".parse().unwrap();
        let mut dialog = Dialog::for_inbound(&invite(), source, "srv1").unwrap();
        let bye = dialog.create_bye(local());

        assert_eq!(bye.method, Method::Bye);
        assert_eq!(bye.uri.to_string(), "sip:alice@10.0.0.2:5062");
        assert_eq!(bye.from_tag().as_deref(), Some("srv1"));
        assert_eq!(bye.to_tag().as_deref(), Some("alice1"));
        assert_eq!(bye.cseq(), Some((1, Method::Bye)));
        assert_eq!(dialog.create_bye(local()).cseq(), Some((2, Method::Bye)));
    }

    #[test]
    fn test_outbound_dialog_continues_cseq() {
        let invite = invite();
        let response = create_response_with_tag(&invite, StatusCode::Ok, "peer9")
            .with_header(HeaderName::Contact, "<sip:100@10.0.0.9:5070>");
        let mut dialog = Dialog::for_outbound(&invite, &response, "10.0.0.9:5070".parse().unwrap()).unwrap();
        let bye = dialog.create_bye(local());
        assert_eq!(bye.cseq(), Some((8, Method::Bye)));
        assert_eq!(bye.to_tag().as_deref(), Some("peer9"));
        assert_eq!(bye.uri.to_string(), "sip:100@10.0.0.9:5070");
    }

    #[test]
    fn test_cancel_matches_invite_transaction() {
        let invite = invite();
        let cancel = create_cancel(&invite);
        assert_eq!(cancel.via_branch(), invite.via_branch());
        assert_eq!(cancel.cseq(), Some((7, Method::Cancel)));
        assert_eq!(cancel.uri, invite.uri);
    }

    #[test]
    fn test_error_ack_reuses_branch() {
        let invite = invite();
        let busy = create_response_with_tag(&invite, StatusCode::BusyHere, "b1");
        let ack = create_ack_for_error(&invite, &busy);
        assert_eq!(ack.via_branch(), invite.via_branch());
        assert_eq!(ack.to_tag().as_deref(), Some("b1"));
        assert_eq!(ack.cseq(), Some((7, Method::Ack)));
    }
}
