//! REGISTER handling against the directory, and calls to registered users.

mod common;

use std::sync::Arc;

use common::{FakePeer, TestSwitchboard};
use pretty_assertions::assert_eq;
use switchboard_call_engine::prelude::*;
use switchboard_sip_core::prelude::*;

fn register(peer: &FakePeer, call_id: &str, expires: Option<u32>) -> Request {
    let request = peer.request(Method::Register, &peer.user, call_id, 1);
    match expires {
        Some(expires) => request.with_header(HeaderName::Expires, expires.to_string()),
        None => request,
    }
}

#[tokio::test]
async fn test_register_without_directory_binds_source() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.send(register(&peer, "reg-1", None)).await;
    let ok = peer.recv_response(200, Method::Register).await;
    assert_eq!(ok.expires(), Some(3600));
    assert!(ok.header(&HeaderName::Contact).unwrap().ends_with(";expires=3600"));
    assert_eq!(pbx.calls.stats().endpoints, 1);

    peer.send(register(&peer, "reg-2", Some(0))).await;
    let ok = peer.recv_response(200, Method::Register).await;
    assert_eq!(ok.expires(), Some(0));
    assert_eq!(pbx.calls.stats().endpoints, 0);
}

#[tokio::test]
async fn test_register_expires_is_capped() {
    let pbx = TestSwitchboard::start().await;
    let peer = FakePeer::new(pbx.addr, "alice").await;

    peer.send(register(&peer, "reg-cap", Some(99_999))).await;
    let ok = peer.recv_response(200, Method::Register).await;
    assert_eq!(ok.expires(), Some(7200));
}

#[tokio::test]
async fn test_directory_gates_registration() {
    let mut disabled = UserRecord::new("bob");
    disabled.enabled = false;
    let directory = Arc::new(InMemoryDirectory::with_users([UserRecord::new("alice"), disabled]));
    let pbx = TestSwitchboard::start_with(|_| {}, {
        let directory = directory.clone();
        move |builder| builder.with_directory(directory)
    })
    .await;

    let carol = FakePeer::new(pbx.addr, "carol").await;
    carol.send(register(&carol, "reg-carol", None)).await;
    carol.recv_response(404, Method::Register).await;

    let bob = FakePeer::new(pbx.addr, "bob").await;
    bob.send(register(&bob, "reg-bob", None)).await;
    bob.recv_response(403, Method::Register).await;

    let alice = FakePeer::new(pbx.addr, "alice").await;
    alice.send(register(&alice, "reg-alice", Some(600))).await;
    alice.recv_response(200, Method::Register).await;

    let record = directory.find_user("alice").await.unwrap().unwrap();
    assert_eq!(record.contact, Some(alice.addr()));
    assert_eq!(record.registration_count, 1);
    assert!(record.expires_at.is_some());
    assert_eq!(pbx.calls.stats().endpoints, 1);
}

#[tokio::test]
async fn test_originate_to_registered_user() {
    let pbx = TestSwitchboard::start().await;
    let alice = FakePeer::new(pbx.addr, "alice").await;

    alice.send(register(&alice, "reg-call", None)).await;
    alice.recv_response(200, Method::Register).await;

    let call_id = pbx.calls.originate("alice").await.unwrap();
    let invite = alice.recv_request(Method::Invite).await;
    assert_eq!(invite.call_id(), Some(call_id.as_str()));
    assert_eq!(invite.uri.user.as_deref(), Some("alice"));
    assert_eq!(pbx.calls.status(&call_id).unwrap().target, alice.addr());

    assert!(pbx.calls.originate("nobody").await.is_err());
}
