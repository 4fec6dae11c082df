//! The call registry: pending inbound calls, active inbound calls, outbound
//! calls and registered endpoints.
//!
//! Each map sits behind its own lock and is only reachable through
//! create/lookup/remove style methods, so callers never hold a lock across an
//! await point. A per-call digit sender lives only inside its registry entry;
//! removing the entry is what closes the channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use switchboard_rtp_core::CallMediaSocket;
use switchboard_sip_core::{Request, Response};

use crate::dialog::Dialog;
use crate::error::{CallEngineError, Result};
use crate::policy::AutomationProfile;
use crate::types::{CallId, OutboundCallSnapshot, OutboundStatus, RegisteredEndpoint};

/// How long terminal outbound calls stay queryable
pub const DEFAULT_OUTBOUND_RETENTION: Duration = Duration::from_secs(300);

/// What a CANCEL found for its Call-ID
#[derive(Debug)]
pub enum CancelTarget {
    /// The INVITE is still being processed; its handler answers `487`
    Inviting,
    /// Answered but not acknowledged
    Pending(PendingInbound),
    Unknown,
}

/// Result of publishing an answered INVITE as pending
#[derive(Debug)]
pub enum PendingOutcome {
    Published,
    /// A retransmission already published the call
    Duplicate,
    /// A CANCEL arrived while the INVITE was processed
    Cancelled(Box<PendingInbound>),
}

/// An accepted INVITE waiting for its ACK.
///
/// Written before the 200 OK leaves, consumed once by the ACK (or CANCEL) handler.
#[derive(Debug)]
pub struct PendingInbound {
    pub call_id: CallId,
    pub peer_media: SocketAddr,
    pub automated: bool,
    /// Resolved together with `automated`, before the entry becomes visible
    pub profile: Option<Arc<AutomationProfile>>,
    /// Payload type the peer uses for telephone-event
    pub event_payload_type: u8,
    pub dialog: Dialog,
    pub socket: CallMediaSocket,
    pub invite: Request,
    /// The 200 OK, resent for retransmitted INVITEs
    pub ok_response: Response,
    /// Stops the 200 OK retransmission
    pub retransmit: CancellationToken,
    pub created_at: DateTime<Utc>,
}

/// An answered inbound call
#[derive(Debug)]
pub struct InboundCall {
    pub call_id: CallId,
    pub peer_media: SocketAddr,
    pub automated: bool,
    pub dialog: Dialog,
    pub socket: CallMediaSocket,
    /// Parent of every task serving this call
    pub cancel: CancellationToken,
    digits_tx: mpsc::Sender<char>,
    pub recording_path: Option<PathBuf>,
    pub answered_at: DateTime<Utc>,
}

impl InboundCall {
    pub fn new(
        pending: &PendingInbound,
        cancel: CancellationToken,
        digits_tx: mpsc::Sender<char>,
    ) -> Self {
        Self {
            call_id: pending.call_id.clone(),
            peer_media: pending.peer_media,
            automated: pending.automated,
            dialog: pending.dialog.clone(),
            socket: pending.socket.clone(),
            cancel,
            digits_tx,
            recording_path: None,
            answered_at: Utc::now(),
        }
    }
}

/// A call this server originated
#[derive(Debug)]
pub struct OutboundCall {
    pub call_id: CallId,
    pub target: SocketAddr,
    status: OutboundStatus,
    transitions: Vec<(OutboundStatus, DateTime<Utc>)>,
    pub invite: Request,
    pub last_response: Option<Response>,
    /// Cancelled when the call leaves `requesting`/`ringing` for good or ends
    pub cancel: CancellationToken,
    /// Responses routed from the signaling loop to the call's driver task
    pub responses_tx: Option<mpsc::Sender<Response>>,
    pub dialog: Option<Dialog>,
    pub socket: Option<CallMediaSocket>,
    pub recording_path: Option<PathBuf>,
}

impl OutboundCall {
    pub fn new(
        call_id: CallId,
        target: SocketAddr,
        invite: Request,
        socket: CallMediaSocket,
        responses_tx: mpsc::Sender<Response>,
    ) -> Self {
        Self {
            call_id,
            target,
            status: OutboundStatus::Requesting,
            transitions: vec![(OutboundStatus::Requesting, Utc::now())],
            invite,
            last_response: None,
            cancel: CancellationToken::new(),
            responses_tx: Some(responses_tx),
            dialog: None,
            socket: Some(socket),
            recording_path: None,
        }
    }

    pub fn status(&self) -> OutboundStatus {
        self.status
    }

    /// Moves to `next` if the status machine allows it.
    ///
    /// Entering a terminal status drops the response channel and the media
    /// socket lease.
    pub fn transition(&mut self, next: OutboundStatus) -> bool {
        if !self.status.can_transition_to(next) {
            trace!(call_id = %self.call_id, "Ignoring transition {} -> {}", self.status, next);
            return false;
        }
        debug!(call_id = %self.call_id, "Outbound call {} -> {}", self.status, next);
        self.status = next;
        self.transitions.push((next, Utc::now()));
        if next.is_terminal() {
            self.responses_tx = None;
            self.socket = None;
        }
        true
    }

    pub fn snapshot(&self) -> OutboundCallSnapshot {
        OutboundCallSnapshot {
            call_id: self.call_id.clone(),
            target: self.target,
            status: self.status,
            transitions: self.transitions.clone(),
            recording_path: self.recording_path.clone(),
        }
    }
}

/// Outcome of routing a DTMF digit to a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitDelivery {
    Delivered,
    /// The call's digit channel was full or closed
    Dropped,
    NoSuchCall,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub pending_inbound: usize,
    pub active_inbound: usize,
    pub outbound: usize,
    pub endpoints: usize,
    /// Automated calls answered with plain media because no profile was attached
    pub automation_fallbacks: u64,
    pub digits_dropped: u64,
}

pub struct CallRegistry {
    /// INVITEs between `100 Trying` and their 200 OK; the token marks a CANCEL
    inviting: RwLock<HashMap<CallId, CancellationToken>>,
    pending: RwLock<HashMap<CallId, PendingInbound>>,
    inbound: RwLock<HashMap<CallId, InboundCall>>,
    outbound: Arc<RwLock<HashMap<CallId, OutboundCall>>>,
    endpoints: RwLock<HashMap<String, RegisteredEndpoint>>,
    outbound_retention: Duration,
    automation_fallbacks: AtomicU64,
    digits_dropped: AtomicU64,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::with_outbound_retention(DEFAULT_OUTBOUND_RETENTION)
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry").field("stats", &self.stats()).finish()
    }
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal outbound calls are dropped `retention` after they end
    pub fn with_outbound_retention(retention: Duration) -> Self {
        Self {
            inviting: RwLock::default(),
            pending: RwLock::default(),
            inbound: RwLock::default(),
            outbound: Arc::default(),
            endpoints: RwLock::default(),
            outbound_retention: retention,
            automation_fallbacks: AtomicU64::new(0),
            digits_dropped: AtomicU64::new(0),
        }
    }

    // -- inviting ------------------------------------------------------------

    /// Marks an INVITE as being processed; false if it already is
    pub fn begin_invite(&self, call_id: &CallId) -> bool {
        let mut map = self.inviting.write();
        if map.contains_key(call_id) {
            return false;
        }
        map.insert(call_id.clone(), CancellationToken::new());
        true
    }

    /// Forgets an INVITE that was rejected or published
    pub fn end_invite(&self, call_id: &CallId) {
        self.inviting.write().remove(call_id);
    }

    /// Cancels whatever stage the INVITE has reached.
    ///
    /// Holds the inviting lock while taking the pending entry, the same order
    /// [`publish_pending`](Self::publish_pending) uses, so a CANCEL can never
    /// fall between the two maps.
    pub fn cancel_invite(&self, call_id: &CallId) -> CancelTarget {
        let inviting = self.inviting.read();
        if let Some(cancelled) = inviting.get(call_id) {
            cancelled.cancel();
            return CancelTarget::Inviting;
        }
        match self.take_pending(call_id) {
            Some(pending) => CancelTarget::Pending(pending),
            None => CancelTarget::Unknown,
        }
    }

    // -- pending inbound -------------------------------------------------

    /// Moves an answered INVITE from inviting to pending, unless a CANCEL
    /// got there first
    pub fn publish_pending(&self, pending: PendingInbound) -> PendingOutcome {
        let mut inviting = self.inviting.write();
        if inviting.remove(&pending.call_id).is_some_and(|c| c.is_cancelled()) {
            return PendingOutcome::Cancelled(Box::new(pending));
        }
        let mut map = self.pending.write();
        if map.contains_key(&pending.call_id) {
            return PendingOutcome::Duplicate;
        }
        map.insert(pending.call_id.clone(), pending);
        PendingOutcome::Published
    }

    /// The 200 OK sent for a pending call
    pub fn pending_response(&self, call_id: &CallId) -> Option<Response> {
        self.pending.read().get(call_id).map(|p| p.ok_response.clone())
    }

    /// Removes and returns the pending entry; the caller owns it from here on
    pub fn take_pending(&self, call_id: &CallId) -> Option<PendingInbound> {
        let pending = self.pending.write().remove(call_id);
        if let Some(p) = &pending {
            p.retransmit.cancel();
        }
        pending
    }

    // -- active inbound --------------------------------------------------

    pub fn insert_inbound(&self, call: InboundCall) {
        let mut map = self.inbound.write();
        if let Some(previous) = map.insert(call.call_id.clone(), call) {
            warn!(call_id = %previous.call_id, "Replaced an active inbound call");
            previous.cancel.cancel();
        }
    }

    pub fn is_inbound_active(&self, call_id: &CallId) -> bool {
        self.inbound.read().contains_key(call_id)
    }

    /// Removes the call; dropping the returned entry closes its digit channel
    pub fn remove_inbound(&self, call_id: &CallId) -> Option<InboundCall> {
        self.inbound.write().remove(call_id)
    }

    /// Non-blocking push onto the call's digit channel; drops the digit when full
    pub fn push_digit(&self, call_id: &CallId, digit: char) -> DigitDelivery {
        let map = self.inbound.read();
        let Some(call) = map.get(call_id) else {
            return DigitDelivery::NoSuchCall;
        };
        match call.digits_tx.try_send(digit) {
            Ok(()) => DigitDelivery::Delivered,
            Err(e) => {
                self.digits_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(call_id = %call_id, "Dropping DTMF digit {}: {}", digit, e);
                DigitDelivery::Dropped
            }
        }
    }

    pub fn set_recording_path(&self, call_id: &CallId, path: PathBuf) {
        if let Some(call) = self.inbound.write().get_mut(call_id) {
            call.recording_path = Some(path);
            return;
        }
        if let Some(call) = self.outbound.write().get_mut(call_id) {
            call.recording_path = Some(path);
        }
    }

    // -- outbound ----------------------------------------------------------

    pub fn insert_outbound(&self, call: OutboundCall) {
        self.outbound.write().insert(call.call_id.clone(), call);
    }

    pub fn outbound_snapshot(&self, call_id: &CallId) -> Option<OutboundCallSnapshot> {
        self.outbound.read().get(call_id).map(OutboundCall::snapshot)
    }

    pub fn outbound_status(&self, call_id: &CallId) -> Option<OutboundStatus> {
        self.outbound.read().get(call_id).map(OutboundCall::status)
    }

    /// Runs `f` against the call under the write lock.
    ///
    /// A call that `f` moves into a terminal status is evicted once the
    /// retention period has passed.
    pub fn with_outbound<R>(&self, call_id: &CallId, f: impl FnOnce(&mut OutboundCall) -> R) -> Result<R> {
        let mut map = self.outbound.write();
        let call = map.get_mut(call_id).ok_or_else(|| CallEngineError::not_found(call_id))?;
        let was_terminal = call.status().is_terminal();
        let result = f(call);
        if !was_terminal && call.status().is_terminal() {
            self.schedule_outbound_eviction(call_id.clone());
        }
        Ok(result)
    }

    fn schedule_outbound_eviction(&self, call_id: CallId) {
        let outbound = Arc::downgrade(&self.outbound);
        let retention = self.outbound_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(outbound) = outbound.upgrade() {
                if outbound.write().remove(&call_id).is_some() {
                    trace!(call_id = %call_id, "Evicted finished outbound call");
                }
            }
        });
    }

    /// Applies a status transition; `Ok(false)` when the machine refused it
    pub fn transition_outbound(&self, call_id: &CallId, next: OutboundStatus) -> Result<bool> {
        self.with_outbound(call_id, |call| call.transition(next))
    }

    /// Sender for routing a response to the call's driver, while one is waiting
    pub fn outbound_response_sender(&self, call_id: &CallId) -> Option<mpsc::Sender<Response>> {
        self.outbound.read().get(call_id).and_then(|c| c.responses_tx.clone())
    }

    pub fn is_outbound(&self, call_id: &CallId) -> bool {
        self.outbound.read().contains_key(call_id)
    }

    // -- endpoints ---------------------------------------------------------

    /// Last writer wins
    pub fn register_endpoint(&self, endpoint: RegisteredEndpoint) {
        debug!("Endpoint {} at {} until {}", endpoint.username, endpoint.addr, endpoint.expires_at);
        self.endpoints.write().insert(endpoint.username.clone(), endpoint);
    }

    pub fn remove_endpoint(&self, username: &str) -> Option<RegisteredEndpoint> {
        self.endpoints.write().remove(username)
    }

    /// Address of a registered user whose binding has not expired
    pub fn lookup_endpoint(&self, username: &str, now: DateTime<Utc>) -> Option<SocketAddr> {
        self.endpoints
            .read()
            .get(username)
            .filter(|endpoint| !endpoint.is_expired(now))
            .map(|endpoint| endpoint.addr)
    }

    // -- stats ---------------------------------------------------------------

    pub fn record_automation_fallback(&self) {
        self.automation_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            pending_inbound: self.pending.read().len(),
            active_inbound: self.inbound.read().len(),
            outbound: self.outbound.read().len(),
            endpoints: self.endpoints.read().len(),
            automation_fallbacks: self.automation_fallbacks.load(Ordering::Relaxed),
            digits_dropped: self.digits_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use switchboard_rtp_core::MediaPortAllocator;
    use switchboard_sip_core::prelude::*;

    fn invite(call_id: &str) -> Request {
        let raw = format!(
            "INVITE sip:100@127.0.0.1 SIP/2.0\r\n\
             Via: SIP/2.0/UDP 127.0.0.1:5062;branch=z9hG4bK{call_id}\r\n\
             From: <sip:alice@127.0.0.1>;tag=a1\r\n\
             To: <sip:100@127.0.0.1>\r\n\
             Call-ID: {call_id}\r\n\
             CSeq: 1 INVITE\r\n\r\n"
        );
        parse_message(raw.as_bytes()).unwrap().into_request().unwrap()
    }

    async fn pending(call_id: &str) -> PendingInbound {
        let allocator = MediaPortAllocator::ephemeral(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let invite = invite(call_id);
        let source: SocketAddr = "127.0.0.1:5062".parse().unwrap();
        PendingInbound {
            call_id: CallId::from(call_id),
            peer_media: "127.0.0.1:40000".parse().unwrap(),
            automated: false,
            profile: None,
            event_payload_type: 101,
            dialog: Dialog::for_inbound(&invite, source, "t1").unwrap(),
            socket: allocator.allocate().await.unwrap(),
            ok_response: create_response_with_tag(&invite, StatusCode::Ok, "t1"),
            invite,
            retransmit: CancellationToken::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_pending_is_consumed_once() {
        let registry = CallRegistry::new();
        let entry = pending("p1").await;
        let retransmit = entry.retransmit.clone();
        assert!(matches!(registry.publish_pending(entry), PendingOutcome::Published));
        assert!(matches!(registry.publish_pending(pending("p1").await), PendingOutcome::Duplicate));

        let id = CallId::from("p1");
        assert!(registry.take_pending(&id).is_some());
        assert!(retransmit.is_cancelled());
        assert!(registry.take_pending(&id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_ack_removes_nothing() {
        let registry = CallRegistry::new();
        registry.publish_pending(pending("p2").await);
        assert!(registry.take_pending(&CallId::from("other")).is_none());
        assert_eq!(registry.stats().pending_inbound, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_invite_processing_blocks_publication() {
        let registry = CallRegistry::new();
        let id = CallId::from("c1");
        assert!(registry.begin_invite(&id));
        assert!(!registry.begin_invite(&id));

        assert!(matches!(registry.cancel_invite(&id), CancelTarget::Inviting));
        // A second CANCEL still finds the INVITE in progress
        assert!(matches!(registry.cancel_invite(&id), CancelTarget::Inviting));

        assert!(matches!(registry.publish_pending(pending("c1").await), PendingOutcome::Cancelled(_)));
        assert_eq!(registry.stats().pending_inbound, 0);
        assert!(matches!(registry.cancel_invite(&id), CancelTarget::Unknown));
    }

    #[tokio::test]
    async fn test_cancel_after_publication_takes_pending() {
        let registry = CallRegistry::new();
        let id = CallId::from("c2");
        assert!(registry.begin_invite(&id));
        assert!(matches!(registry.publish_pending(pending("c2").await), PendingOutcome::Published));
        assert!(matches!(registry.cancel_invite(&id), CancelTarget::Pending(_)));
        assert_eq!(registry.stats().pending_inbound, 0);
    }

    #[tokio::test]
    async fn test_terminal_outbound_call_is_evicted_after_retention() {
        let registry = CallRegistry::with_outbound_retention(Duration::from_millis(50));
        let allocator = MediaPortAllocator::ephemeral(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let (tx, _rx) = mpsc::channel(4);
        let id = CallId::from("o2");
        let socket = allocator.allocate().await.unwrap();
        registry.insert_outbound(OutboundCall::new(id.clone(), "127.0.0.1:5070".parse().unwrap(), invite("o2"), socket, tx));

        assert!(registry.transition_outbound(&id, OutboundStatus::Failed).unwrap());
        assert_eq!(registry.outbound_status(&id), Some(OutboundStatus::Failed));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.outbound_snapshot(&id).is_none());
        assert_eq!(registry.stats().outbound, 0);
    }

    #[tokio::test]
    async fn test_digit_channel_drops_when_full_and_closes_on_removal() {
        let registry = CallRegistry::new();
        let entry = pending("d1").await;
        let (tx, mut rx) = mpsc::channel(1);
        registry.insert_inbound(InboundCall::new(&entry, CancellationToken::new(), tx));

        let id = CallId::from("d1");
        assert_eq!(registry.push_digit(&id, '1'), DigitDelivery::Delivered);
        assert_eq!(registry.push_digit(&id, '2'), DigitDelivery::Dropped);
        assert_eq!(registry.push_digit(&CallId::from("nope"), '3'), DigitDelivery::NoSuchCall);
        assert_eq!(registry.stats().digits_dropped, 1);

        assert_eq!(rx.recv().await, Some('1'));
        drop(registry.remove_inbound(&id));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_outbound_terminal_releases_resources() {
        let registry = CallRegistry::new();
        let allocator = MediaPortAllocator::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 42000, 42010).unwrap();
        let socket = allocator.allocate().await.unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let id = CallId::from("o1");
        registry.insert_outbound(OutboundCall::new(id.clone(), "127.0.0.1:5070".parse().unwrap(), invite("o1"), socket, tx));
        assert_eq!(allocator.in_use(), 1);

        assert!(registry.transition_outbound(&id, OutboundStatus::Ringing).unwrap());
        assert!(registry.transition_outbound(&id, OutboundStatus::Cancelled).unwrap());
        assert!(!registry.transition_outbound(&id, OutboundStatus::Answered).unwrap());
        assert_eq!(allocator.in_use(), 0);
        assert!(registry.outbound_response_sender(&id).is_none());

        let snapshot = registry.outbound_snapshot(&id).unwrap();
        let statuses: Vec<_> = snapshot.transitions.iter().map(|(s, _)| *s).collect();
        assert_eq!(statuses, vec![OutboundStatus::Requesting, OutboundStatus::Ringing, OutboundStatus::Cancelled]);
        assert!(registry.transition_outbound(&CallId::from("missing"), OutboundStatus::Ended).is_err());
    }

    #[test]
    fn test_endpoint_last_writer_wins_and_expiry() {
        let registry = CallRegistry::new();
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(60);
        registry.register_endpoint(RegisteredEndpoint {
            username: "bob".into(),
            addr: "10.0.0.5:5060".parse().unwrap(),
            expires_at: later,
        });
        registry.register_endpoint(RegisteredEndpoint {
            username: "bob".into(),
            addr: "10.0.0.6:5060".parse().unwrap(),
            expires_at: later,
        });
        assert_eq!(registry.lookup_endpoint("bob", now), Some("10.0.0.6:5060".parse().unwrap()));
        assert_eq!(registry.lookup_endpoint("bob", later), None);
        assert!(registry.remove_endpoint("bob").is_some());
    }
}
