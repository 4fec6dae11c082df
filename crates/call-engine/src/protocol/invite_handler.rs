//! INVITE Request Handler
//!
//! Answers incoming calls according to RFC 3261 Section 13.3 and the SDP
//! offer/answer model of RFC 3264.
//!
//! ## Processing Steps
//!
//! 1. A retransmitted INVITE gets the same 200 OK again
//! 2. The INVITE is marked in progress, so a CANCEL can find it from here on,
//!    and `100 Trying` goes out
//! 3. The SDP offer is parsed: no offer or no common codec → `488`,
//!    an unparseable offer → `500`
//! 4. The automation policy is consulted for the called user; the profile is
//!    resolved here, before anything is published
//! 5. A per-call RTP socket is allocated and the SDP answer built on it
//! 6. The call record is saved and the pending entry written
//! 7. Only then is the `200 OK` sent, and retransmitted until the ACK arrives
//!
//! Step 6 happening before step 7 is what lets the ACK handler always find
//! the pending entry. A CANCEL that lands anywhere between steps 2 and 6 is
//! seen when the pending entry is published; the INVITE then gets `487`
//! instead of the `200 OK`.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_sip_core::prelude::*;
use switchboard_sip_core::sdp::PAYLOAD_TYPE_TELEPHONE_EVENT;

use crate::controller::{sdp_session_id, CallController};
use crate::dialog::Dialog;
use crate::error::{CallEngineError, Result};
use crate::registry::{CallRegistry, PendingInbound, PendingOutcome};
use crate::store::{persist_call, save_new_call};
use crate::types::{CallDirection, CallId, CallRecord, CallRecordStatus};

/// INVITE-specific handling operations
pub trait InviteHandler {
    /// Handle an INVITE that may start a new inbound call
    fn handle_invite_method(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl InviteHandler for CallController {
    async fn handle_invite_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(call_id) = request.call_id().map(CallId::from) else {
            self.respond(&request, StatusCode::BadRequest, source).await?;
            return Err(CallEngineError::protocol("INVITE without Call-ID"));
        };

        if let Some(ok) = self.registry.pending_response(&call_id) {
            debug!(call_id = %call_id, "Retransmitted INVITE, resending 200 OK");
            return self.send_message(ok, source).await;
        }
        if self.registry.is_inbound_active(&call_id) {
            // re-INVITE; session modification is not supported
            debug!(call_id = %call_id, "Rejecting INVITE inside an established call");
            return self.respond(&request, StatusCode::NotAcceptableHere, source).await;
        }

        if !self.registry.begin_invite(&call_id) {
            debug!(call_id = %call_id, "INVITE retransmitted while still being processed");
            return self.respond(&request, StatusCode::Trying, source).await;
        }
        let _in_progress = InviteInProgress { registry: self.registry.clone(), call_id: call_id.clone() };

        self.respond(&request, StatusCode::Trying, source).await?;

        let offer = match parse_offer(&request) {
            Ok(offer) => offer,
            Err(status) => {
                warn!(call_id = %call_id, "Rejecting INVITE from {} with {}", source, status.as_u16());
                return self.respond(&request, status, source).await;
            }
        };

        let called_user = called_user(&request);
        let automated = self.policy.is_automated(&called_user).await;
        let profile = if automated {
            self.policy.resolve_profile(&called_user).await
        } else {
            None
        };
        debug!(call_id = %call_id, "Called user '{}', automated={}, profile={}", called_user, automated, profile.is_some());

        let socket = match self.media_ports.allocate().await {
            Ok(socket) => socket,
            Err(e) => {
                self.respond(&request, StatusCode::ServiceUnavailable, source).await?;
                return Err(e.into());
            }
        };
        let answer = match SessionDescription::answer_to(
            &offer,
            self.public_ip,
            socket.local_addr().port(),
            sdp_session_id(),
        ) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(call_id = %call_id, "No acceptable codec in offer: {}", e);
                return self.respond(&request, StatusCode::NotAcceptableHere, source).await;
            }
        };

        let local_tag = generate_tag();
        let Some(dialog) = Dialog::for_inbound(&request, source, &local_tag) else {
            self.respond(&request, StatusCode::BadRequest, source).await?;
            return Err(CallEngineError::protocol("INVITE without usable From/To"));
        };

        let contact = NameAddr::new(Uri::sip(
            Some(called_user.as_str()).filter(|u| !u.is_empty()),
            self.public_ip.to_string(),
            Some(self.bind_addr.port()),
        ));
        let ok = create_response_with_tag(&request, StatusCode::Ok, &local_tag)
            .with_header(HeaderName::Contact, contact.to_string())
            .with_header(HeaderName::Allow, Method::allow_header_value())
            .with_body(SDP_CONTENT_TYPE, answer.to_string());

        let mut record = CallRecord::new(
            call_id.clone(),
            CallDirection::Inbound,
            dialog.remote.uri.to_string(),
            dialog.local.uri.to_string(),
        );
        record.automated = automated;
        save_new_call(self.call_store.as_ref(), record).await;

        let retransmit = CancellationToken::new();
        let pending = PendingInbound {
            call_id: call_id.clone(),
            peer_media: offer.media_addr(),
            automated,
            profile,
            event_payload_type: offer.telephone_event_payload_type().unwrap_or(PAYLOAD_TYPE_TELEPHONE_EVENT),
            dialog,
            socket,
            invite: request,
            ok_response: ok.clone(),
            retransmit: retransmit.clone(),
            created_at: Utc::now(),
        };
        match self.registry.publish_pending(pending) {
            PendingOutcome::Published => {}
            // A retransmission won the race; it already answered
            PendingOutcome::Duplicate => return Ok(()),
            PendingOutcome::Cancelled(pending) => {
                info!(call_id = %call_id, "INVITE cancelled before it was answered");
                let terminated = create_response_with_tag(&pending.invite, StatusCode::RequestTerminated, &local_tag);
                self.send_message(terminated, source).await?;
                let ended_at = Utc::now();
                persist_call(self.call_store.as_ref(), &call_id, move |record| {
                    record.mark_ended(CallRecordStatus::Cancelled, ended_at)
                })
                .await;
                return Ok(());
            }
        }

        info!(call_id = %call_id, "Answering call from {} (media {})", source, offer.media_addr());
        self.send_message(ok.clone(), source).await?;
        self.spawn_ok_retransmission(call_id, ok, source, retransmit);
        Ok(())
    }
}

/// Clears the in-progress mark however the INVITE handler exits
struct InviteInProgress {
    registry: Arc<CallRegistry>,
    call_id: CallId,
}

impl Drop for InviteInProgress {
    fn drop(&mut self) {
        self.registry.end_invite(&self.call_id);
    }
}

impl CallController {
    /// Resends the 200 OK (T1 doubling, capped at T2) until the ACK cancels
    /// `retransmit`; gives the call up once the ACK wait elapses.
    fn spawn_ok_retransmission(&self, call_id: CallId, ok: Response, destination: SocketAddr, retransmit: CancellationToken) {
        let controller = self.clone();
        tokio::spawn(async move {
            let signaling = &controller.config.signaling;
            let deadline = tokio::time::Instant::now() + signaling.ack_wait();
            let mut interval = signaling.t1();
            loop {
                tokio::select! {
                    _ = retransmit.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                debug!(call_id = %call_id, "Retransmitting 200 OK");
                if let Err(e) = controller.send_message(ok.clone(), destination).await {
                    debug!(call_id = %call_id, "200 OK retransmission failed: {}", e);
                }
                interval = (interval * 2).min(signaling.t2());
            }

            if controller.registry.take_pending(&call_id).is_some() {
                warn!(call_id = %call_id, "No ACK within {:?}, dropping call", signaling.ack_wait());
                let ended_at = Utc::now();
                persist_call(controller.call_store.as_ref(), &call_id, move |record| {
                    record.mark_ended(CallRecordStatus::Failed, ended_at)
                })
                .await;
            }
        });
    }
}

/// The offer in the INVITE body, or the status to reject it with
fn parse_offer(request: &Request) -> std::result::Result<SessionDescription, StatusCode> {
    let body = request.body_str().map(str::trim).unwrap_or_default();
    if body.is_empty() {
        // Offerless INVITE (offer in the 200 OK) is not supported
        return Err(StatusCode::NotAcceptableHere);
    }
    body.parse().map_err(|_| StatusCode::ServerInternalError)
}

/// User part of the Request-URI, falling back to the To header
fn called_user(request: &Request) -> String {
    request
        .uri
        .user
        .clone()
        .or_else(|| request.to_addr().and_then(|to| to.uri.user))
        .unwrap_or_default()
}
