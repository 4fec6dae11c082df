//! Inbound call control over loopback UDP: answer, acknowledge, tear down,
//! and the error paths around unknown dialogs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{eventually, FakePeer, TestSwitchboard};
use pretty_assertions::assert_eq;
use switchboard_call_engine::dialog::create_cancel;
use switchboard_call_engine::prelude::*;
use switchboard_sip_core::prelude::*;

#[tokio::test]
async fn test_invite_ack_bye_lifecycle() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    let invite = peer.invite("reception", "life-1");
    peer.send(invite.clone()).await;
    peer.recv_response(100, Method::Invite).await;
    let ok = peer.recv_response(200, Method::Invite).await;

    assert!(ok.to_tag().is_some(), "200 OK must carry a local tag");
    assert_eq!(ok.content_type(), Some(SDP_CONTENT_TYPE));
    let answer: SessionDescription = ok.body_str().unwrap().parse().unwrap();
    assert_ne!(answer.audio_port, 0);
    assert_eq!(answer.telephone_event_payload_type(), Some(101));
    assert!(ok.header(&HeaderName::Allow).unwrap().contains("BYE"));

    // The record exists before the call is acknowledged
    let ringing = pbx.record("life-1").expect("record saved before the 200 OK");
    assert_eq!(ringing.status, CallRecordStatus::Ringing);
    assert_eq!(ringing.direction, CallDirection::Inbound);

    peer.send(peer.ack(&invite, &ok)).await;
    eventually(|| pbx.calls.registry().is_inbound_active(&CallId::from("life-1")).then_some(())).await;
    pbx.record_status("life-1", CallRecordStatus::Answered).await;

    peer.send(peer.in_dialog(Method::Bye, &invite, &ok, 2)).await;
    peer.recv_response(200, Method::Bye).await;

    let ended = pbx.record_status("life-1", CallRecordStatus::Ended).await;
    assert!(ended.ended_at.is_some());
    assert!(ended.duration_secs.is_some());
    assert_eq!(pbx.calls.stats().active_inbound, 0);
}

#[tokio::test]
async fn test_ack_right_after_ok_finds_pending_call() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.establish("reception", "fast-ack").await;

    eventually(|| pbx.calls.registry().is_inbound_active(&CallId::from("fast-ack")).then_some(())).await;
    assert_eq!(pbx.calls.stats().pending_inbound, 0);
}

#[tokio::test]
async fn test_unknown_dialog_requests_get_481() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.send(peer.request(Method::Bye, "reception", "nobody-1", 2)).await;
    peer.recv_response(481, Method::Bye).await;

    let info = peer
        .request(Method::Info, "reception", "nobody-2", 2)
        .with_body("application/dtmf-relay", "Signal=5\r\nDuration=160\r\n");
    peer.send(info).await;
    peer.recv_response(481, Method::Info).await;

    peer.send(peer.request(Method::Cancel, "reception", "nobody-3", 1)).await;
    peer.recv_response(481, Method::Cancel).await;
}

#[tokio::test]
async fn test_cancel_before_ack_terminates_invite() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    let invite = peer.invite("reception", "cancel-1");
    peer.send(invite.clone()).await;
    peer.recv_response(200, Method::Invite).await;

    peer.send(create_cancel(&invite)).await;
    peer.recv_response(200, Method::Cancel).await;
    let terminated = peer.recv_response(487, Method::Invite).await;
    assert!(terminated.to_tag().is_some());

    pbx.record_status("cancel-1", CallRecordStatus::Cancelled).await;
    let stats = pbx.calls.stats();
    assert_eq!(stats.pending_inbound, 0);
    assert_eq!(stats.active_inbound, 0);
}

/// Takes its time deciding, like a policy backed by a remote lookup
struct SlowPolicy {
    delay: Duration,
}

#[async_trait]
impl AutomationPolicy for SlowPolicy {
    async fn is_automated(&self, _called_user: &str) -> bool {
        tokio::time::sleep(self.delay).await;
        false
    }

    async fn resolve_profile(&self, _called_user: &str) -> Option<Arc<AutomationProfile>> {
        None
    }
}

#[tokio::test]
async fn test_cancel_while_invite_is_processed() {
    let policy = Arc::new(SlowPolicy { delay: Duration::from_millis(300) });
    let pbx = TestSwitchboard::start_with(|_| {}, move |builder| builder.with_policy(policy)).await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    let invite = peer.invite("reception", "slow-cancel");
    peer.send(invite.clone()).await;
    peer.recv_response(100, Method::Invite).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    peer.send(create_cancel(&invite)).await;

    let mut seen = Vec::new();
    let terminated = loop {
        let Message::Response(response) = peer.recv().await else {
            continue;
        };
        let method = response.cseq().map(|(_, m)| m);
        seen.push((response.status.as_u16(), method.clone()));
        if response.status.as_u16() == 487 && method == Some(Method::Invite) {
            break response;
        }
    };
    assert!(seen.contains(&(200, Some(Method::Cancel))), "CANCEL not accepted: {seen:?}");
    assert!(!seen.contains(&(200, Some(Method::Invite))), "cancelled INVITE was answered: {seen:?}");
    assert!(terminated.to_tag().is_some());

    // Nothing answers the INVITE afterwards
    while let Some(message) = peer.try_recv(Duration::from_millis(200)).await {
        if let Message::Response(response) = message {
            assert_ne!(response.status.as_u16(), 200, "late 200 OK after CANCEL");
        }
    }
    pbx.record_status("slow-cancel", CallRecordStatus::Cancelled).await;
    let stats = pbx.calls.stats();
    assert_eq!(stats.pending_inbound, 0);
    assert_eq!(stats.active_inbound, 0);
}

#[tokio::test]
async fn test_unknown_ack_is_ignored() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.send(peer.request(Method::Ack, "reception", "stray-ack", 1)).await;
    assert!(peer.try_recv(Duration::from_millis(200)).await.is_none());

    let stats = pbx.calls.stats();
    assert_eq!(stats.pending_inbound + stats.active_inbound, 0);
}

#[tokio::test]
async fn test_options_and_unsupported_methods() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.send(peer.request(Method::Options, "reception", "probe-1", 1)).await;
    let ok = peer.recv_response(200, Method::Options).await;
    let allow = ok.header(&HeaderName::Allow).unwrap();
    for method in ["INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "INFO", "REGISTER"] {
        assert!(allow.contains(method), "{method} missing from Allow: {allow}");
    }

    let publish = Method::Extension("PUBLISH".into());
    peer.send(peer.request(publish.clone(), "reception", "probe-2", 1)).await;
    peer.recv_response(501, publish).await;
}

#[tokio::test]
async fn test_reinvite_on_active_call_is_rejected() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    let (invite, ok) = peer.establish("reception", "reinvite-1").await;
    eventually(|| pbx.calls.registry().is_inbound_active(&CallId::from("reinvite-1")).then_some(())).await;

    let reinvite = peer
        .in_dialog(Method::Invite, &invite, &ok, 2)
        .with_body(SDP_CONTENT_TYPE, peer.offer().to_string());
    peer.send(reinvite).await;
    peer.recv_response(488, Method::Invite).await;
    assert!(pbx.calls.registry().is_inbound_active(&CallId::from("reinvite-1")));
}

#[tokio::test]
async fn test_invite_without_offer_is_not_acceptable() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.send(peer.request(Method::Invite, "reception", "no-sdp", 1)).await;
    peer.recv_response(488, Method::Invite).await;
    assert_eq!(pbx.calls.stats().pending_inbound, 0);
}

#[tokio::test]
async fn test_info_digits_reach_active_call() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    let (invite, ok) = peer.establish("reception", "dtmf-1").await;
    eventually(|| pbx.calls.registry().is_inbound_active(&CallId::from("dtmf-1")).then_some(())).await;

    let digit = peer
        .in_dialog(Method::Info, &invite, &ok, 2)
        .with_body("application/dtmf-relay", "Signal=7\r\nDuration=160\r\n");
    peer.send(digit).await;
    peer.recv_response(200, Method::Info).await;

    let garbage = peer
        .in_dialog(Method::Info, &invite, &ok, 3)
        .with_body("application/dtmf-relay", "Volume=10\r\n");
    peer.send(garbage).await;
    peer.recv_response(400, Method::Info).await;
}

#[tokio::test]
async fn test_unacknowledged_call_is_given_up() {
    let pbx = TestSwitchboard::start_with(|config| config.signaling.ack_wait_ms = 300, |b| b).await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.send(peer.invite("reception", "no-ack")).await;
    peer.recv_response(200, Method::Invite).await;
    // Retransmitted while unacknowledged
    peer.recv_response(200, Method::Invite).await;

    pbx.record_status("no-ack", CallRecordStatus::Failed).await;
    assert_eq!(pbx.calls.stats().pending_inbound, 0);
}

#[tokio::test]
async fn test_automated_call_without_speech_gets_plain_media() {
    let pbx = TestSwitchboard::start_with(
        |config| {
            config.automation.automated_users = vec!["attendant".into()];
            config
                .automation
                .profiles
                .insert("attendant".into(), AutomationProfile::default());
        },
        |b| b,
    )
    .await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.establish("attendant", "auto-1").await;

    eventually(|| (pbx.calls.stats().automation_fallbacks == 1).then_some(())).await;
    assert!(pbx.calls.registry().is_inbound_active(&CallId::from("auto-1")));
    assert!(pbx.record("auto-1").unwrap().automated);
}

#[tokio::test]
async fn test_server_hang_up_sends_bye() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.establish("reception", "hangup-1").await;
    let call_id = CallId::from("hangup-1");
    eventually(|| pbx.calls.registry().is_inbound_active(&call_id).then_some(())).await;

    pbx.calls.hang_up_inbound(&call_id).await.unwrap();
    let bye = peer.recv_request(Method::Bye).await;
    assert_eq!(bye.call_id(), Some("hangup-1"));
    pbx.record_status("hangup-1", CallRecordStatus::Ended).await;

    assert!(matches!(
        pbx.calls.hang_up_inbound(&call_id).await,
        Err(CallEngineError::NotFound(_))
    ));
}
