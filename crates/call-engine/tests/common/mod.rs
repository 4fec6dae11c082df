//! Shared fixtures: a loopback switchboard and a scripted SIP peer.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use switchboard_call_engine::prelude::*;
use switchboard_sip_core::prelude::*;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback configuration with short timers and OS-assigned ports
pub fn test_config(recordings: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.signaling.bind_addr = SocketAddr::new(LOCALHOST, 0);
    config.signaling.t1_ms = 50;
    config.signaling.t2_ms = 200;
    config.signaling.ack_wait_ms = 2_000;
    config.signaling.invite_timeout_ms = 3_000;
    config.media.bind_ip = LOCALHOST;
    config.media.rtp_port_start = 0;
    config.media.record_max_ms = 200;
    config.media.recordings_dir = recordings.to_path_buf();
    config.media.recording_grace_ms = 20;
    config
}

pub struct TestSwitchboard {
    pub calls: CallController,
    pub store: Arc<InMemoryCallStore>,
    pub addr: SocketAddr,
    pub recordings: tempfile::TempDir,
}

impl TestSwitchboard {
    pub async fn start() -> Self {
        Self::start_with(|_| {}, |builder| builder).await
    }

    /// `configure` edits the loopback config; `extend` adds collaborators
    pub async fn start_with(
        configure: impl FnOnce(&mut ServerConfig),
        extend: impl FnOnce(SwitchboardServerBuilder) -> SwitchboardServerBuilder,
    ) -> Self {
        let recordings = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(recordings.path());
        configure(&mut config);

        let store = Arc::new(InMemoryCallStore::new());
        let builder = SwitchboardServerBuilder::new()
            .with_config(config)
            .with_call_store(store.clone());
        let server = extend(builder).build().await.expect("switchboard starts");
        let addr = server.local_addr();
        let calls = server.controller();
        tokio::spawn(server.run());
        Self { calls, store, addr, recordings }
    }

    pub fn record(&self, call_id: &str) -> Option<CallRecord> {
        self.store
            .records()
            .into_iter()
            .find(|r| r.call_id.as_str() == call_id)
    }

    pub async fn record_status(&self, call_id: &str, status: CallRecordStatus) -> CallRecord {
        eventually(|| self.record(call_id).filter(|r| r.status == status)).await
    }
}

/// Polls `check` until it yields a value, panicking after a few seconds
pub async fn eventually<T>(mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if let Some(value) = check() {
            return value;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A SIP user agent driven step by step from the test
pub struct FakePeer {
    pub socket: UdpSocket,
    /// Where the peer accepts RTP; kept open so media sends succeed
    pub media: UdpSocket,
    pub server: SocketAddr,
    pub user: String,
}

impl FakePeer {
    pub async fn new(server: SocketAddr, user: &str) -> Self {
        let socket = UdpSocket::bind((LOCALHOST, 0)).await.expect("bind peer");
        let media = UdpSocket::bind((LOCALHOST, 0)).await.expect("bind peer media");
        Self { socket, media, server, user: user.to_string() }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("peer address")
    }

    pub fn media_addr(&self) -> SocketAddr {
        self.media.local_addr().expect("peer media address")
    }

    pub fn uri(&self) -> Uri {
        let addr = self.addr();
        Uri::sip(Some(&self.user), addr.ip().to_string(), Some(addr.port()))
    }

    pub fn offer(&self) -> SessionDescription {
        SessionDescription::audio(LOCALHOST, self.media_addr().port(), 1)
    }

    fn template(&self, to_user: &str, call_id: &str, cseq: u32) -> RequestTemplate {
        RequestTemplate {
            local_addr: self.addr(),
            from: NameAddr::new(self.uri()).with_tag(format!("{}-tag", self.user)),
            to: NameAddr::new(self.server_uri(to_user)),
            call_id: call_id.to_string(),
            cseq,
        }
    }

    pub fn server_uri(&self, user: &str) -> Uri {
        Uri::sip(Some(user), self.server.ip().to_string(), Some(self.server.port()))
    }

    /// Out-of-dialog request to `to_user` at the switchboard
    pub fn request(&self, method: Method, to_user: &str, call_id: &str, cseq: u32) -> Request {
        create_request(method, self.server_uri(to_user), &self.template(to_user, call_id, cseq))
    }

    pub fn invite(&self, to_user: &str, call_id: &str) -> Request {
        self.request(Method::Invite, to_user, call_id, 1)
            .with_body(SDP_CONTENT_TYPE, self.offer().to_string())
    }

    /// In-dialog request following the switchboard's 2xx
    pub fn in_dialog(&self, method: Method, invite: &Request, ok: &Response, cseq: u32) -> Request {
        let mut template = self.template("", invite.call_id().unwrap_or_default(), cseq);
        template.to = ok.to_addr().expect("To in 200 OK");
        let target = ok.contact().map(|c| c.uri).unwrap_or_else(|| invite.uri.clone());
        create_request(method, target, &template)
    }

    pub fn ack(&self, invite: &Request, ok: &Response) -> Request {
        create_ack_for_2xx(invite, ok, self.addr())
    }

    pub async fn send(&self, message: impl Into<Message>) {
        let bytes = message.into().to_bytes();
        self.socket.send_to(&bytes, self.server).await.expect("peer send");
    }

    pub async fn recv(&self) -> Message {
        self.try_recv(RECV_TIMEOUT).await.expect("no SIP message from the switchboard")
    }

    pub async fn try_recv(&self, wait: Duration) -> Option<Message> {
        let mut buf = vec![0u8; 65_535];
        let (len, _) = tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await.ok()?.ok()?;
        Some(parse_message(&buf[..len]).expect("switchboard sent valid SIP"))
    }

    /// Next response with `code` to a request of `method`, skipping anything else
    pub async fn recv_response(&self, code: u16, method: Method) -> Response {
        loop {
            if let Message::Response(response) = self.recv().await {
                let matches_method = response.cseq().map(|(_, m)| m == method).unwrap_or(false);
                if response.status.as_u16() == code && matches_method {
                    return response;
                }
            }
        }
    }

    /// Next request with `method`, skipping anything else
    pub async fn recv_request(&self, method: Method) -> Request {
        loop {
            if let Message::Request(request) = self.recv().await {
                if request.method == method {
                    return request;
                }
            }
        }
    }

    /// Sends INVITE, waits for the 200 OK and acknowledges it
    pub async fn establish(&self, to_user: &str, call_id: &str) -> (Request, Response) {
        let invite = self.invite(to_user, call_id);
        self.send(invite.clone()).await;
        let ok = self.recv_response(200, Method::Invite).await;
        self.send(self.ack(&invite, &ok)).await;
        (invite, ok)
    }
}
