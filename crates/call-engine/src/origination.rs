//! Outbound calls: origination, cancellation, hang-up and status.
//!
//! `originate` returns as soon as the INVITE is queued; a driver task per call
//! then waits for responses and applies the status machine
//! (`requesting → {ringing} → answered → ended`, or `failed`/`cancelled`
//! before answer). Every transition goes through [`OutboundCall::transition`],
//! so a status never moves backwards.
//!
//! [`OutboundCall::transition`]: crate::registry::OutboundCall::transition

use std::net::SocketAddr;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use switchboard_infra_common::call_span;
use switchboard_rtp_core::CallMediaSocket;
use switchboard_sip_core::prelude::*;

use crate::controller::{sdp_session_id, CallController};
use crate::dialog::{create_ack_for_error, create_cancel, Dialog};
use crate::error::{CallEngineError, Result};
use crate::media::clip::load_optional_clip;
use crate::media::recorder::record_until_cancelled;
use crate::media::{recording_path, MediaStream, SharedRecorder};
use crate::registry::OutboundCall;
use crate::store::{persist_call, save_new_call};
use crate::types::{CallDirection, CallId, CallRecord, CallRecordStatus, OutboundCallSnapshot, OutboundStatus};

/// User part of the From URI on calls we originate
pub const ORIGINATOR_USER: &str = "switchboard";

const RESPONSE_CHANNEL_CAPACITY: usize = 16;

impl CallController {
    /// Starts a call to `target` and returns its identifier immediately.
    ///
    /// `target` may be a SIP URI (`sip:bob@10.0.0.5:5060`), `user@host`, a
    /// socket address, or the bare name of a registered user. A registered
    /// user's binding overrides the URI's host.
    pub async fn originate(&self, target: &str) -> Result<CallId> {
        let (target_uri, peer) = self.resolve_target(target).await?;
        if self.is_own_address(peer) {
            return Err(CallEngineError::SelfCall(peer));
        }

        let socket = self.media_ports.allocate().await?;
        let contact = self.contact_addr();
        let call_id = CallId::from(generate_call_id(&self.public_ip.to_string()));
        let from = NameAddr::new(Uri::sip(Some(ORIGINATOR_USER), self.public_ip.to_string(), Some(contact.port())))
            .with_tag(generate_tag());
        let offer = SessionDescription::audio(self.public_ip, socket.local_addr().port(), sdp_session_id());
        let template = RequestTemplate {
            local_addr: contact,
            from: from.clone(),
            to: NameAddr::new(target_uri.clone()),
            call_id: call_id.to_string(),
            cseq: 1,
        };
        let invite = create_request(Method::Invite, target_uri.clone(), &template)
            .with_body(SDP_CONTENT_TYPE, offer.to_string());

        let (responses_tx, responses_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let mut call = OutboundCall::new(call_id.clone(), peer, invite.clone(), socket, responses_tx);
        call.cancel = self.shutdown.child_token();
        let lifetime = call.cancel.clone();

        save_new_call(
            self.call_store.as_ref(),
            CallRecord::new(call_id.clone(), CallDirection::Outbound, from.uri.to_string(), target_uri.to_string()),
        )
        .await;
        self.registry.insert_outbound(call);
        info!(call_id = %call_id, "Calling {} at {}", target_uri, peer);

        let controller = self.clone();
        let span = call_span("outbound", call_id.as_str());
        let driver_id = call_id.clone();
        tokio::spawn(
            async move { controller.drive_outbound(driver_id, peer, invite, responses_rx, lifetime).await }
                .instrument(span),
        );
        Ok(call_id)
    }

    /// Stops a call: CANCEL before answer, BYE after. Terminal calls are left alone.
    pub async fn cancel(&self, call_id: &CallId) -> Result<()> {
        loop {
            let status = self
                .registry
                .outbound_status(call_id)
                .ok_or_else(|| CallEngineError::not_found(call_id))?;
            match status {
                OutboundStatus::Failed | OutboundStatus::Cancelled | OutboundStatus::Ended => {
                    debug!(call_id = %call_id, "Cancel ignored, call already {}", status);
                    return Ok(());
                }
                OutboundStatus::Answered => return self.end_outbound(call_id).await,
                OutboundStatus::Requesting | OutboundStatus::Ringing => {
                    let cancelled = self.registry.with_outbound(call_id, |call| {
                        if !call.transition(OutboundStatus::Cancelled) {
                            return None;
                        }
                        call.cancel.cancel();
                        Some((create_cancel(&call.invite), call.target))
                    })?;
                    // The driver moved the call on meanwhile; look again
                    let Some((request, target)) = cancelled else {
                        continue;
                    };
                    info!(call_id = %call_id, "Cancelling call");
                    self.persist_outbound_end(call_id, CallRecordStatus::Cancelled).await;
                    return self.send_message(request, target).await;
                }
            }
        }
    }

    /// Ends an answered call with a BYE
    pub async fn hang_up(&self, call_id: &CallId) -> Result<()> {
        let status = self
            .registry
            .outbound_status(call_id)
            .ok_or_else(|| CallEngineError::not_found(call_id))?;
        match status {
            OutboundStatus::Answered => self.end_outbound(call_id).await,
            status if status.is_terminal() => Ok(()),
            status => Err(CallEngineError::invalid_state(format!(
                "cannot hang up call {call_id}: it is {status}, not answered"
            ))),
        }
    }

    pub fn status(&self, call_id: &CallId) -> Result<OutboundCallSnapshot> {
        self.registry
            .outbound_snapshot(call_id)
            .ok_or_else(|| CallEngineError::not_found(call_id))
    }

    async fn end_outbound(&self, call_id: &CallId) -> Result<()> {
        let local = self.contact_addr();
        let ended = self.registry.with_outbound(call_id, |call| {
            if !call.transition(OutboundStatus::Ended) {
                return None;
            }
            call.cancel.cancel();
            let bye = call.dialog.as_mut().map(|dialog| (dialog.create_bye(local), dialog.peer));
            Some((bye, call.recording_path.clone()))
        })?;
        let Some((bye, recording)) = ended else {
            debug!(call_id = %call_id, "Call already ended");
            return Ok(());
        };

        info!(call_id = %call_id, "Hanging up");
        self.persist_outbound_end(call_id, CallRecordStatus::Ended).await;
        if let Some(path) = recording {
            self.attach_recording_later(call_id.clone(), path);
        }
        match bye {
            Some((bye, peer)) => self.send_message(bye, peer).await,
            None => Err(CallEngineError::Internal(format!("answered call {call_id} has no dialog"))),
        }
    }

    async fn persist_outbound_end(&self, call_id: &CallId, status: CallRecordStatus) {
        let ended_at = Utc::now();
        persist_call(self.call_store.as_ref(), call_id, move |record| record.mark_ended(status, ended_at)).await;
    }

    /// Target URI and the address the INVITE goes to
    async fn resolve_target(&self, target: &str) -> Result<(Uri, SocketAddr)> {
        let target = target.trim();
        let uri = if let Ok(addr) = target.parse::<SocketAddr>() {
            Uri::sip(None, addr.ip().to_string(), Some(addr.port()))
        } else if target.starts_with("sip:") {
            target.parse()?
        } else if target.contains('@') {
            format!("sip:{target}").parse()?
        } else {
            let addr = self
                .registry
                .lookup_endpoint(target, Utc::now())
                .ok_or_else(|| CallEngineError::protocol(format!("no registered endpoint for '{target}'")))?;
            return Ok((Uri::sip(Some(target), addr.ip().to_string(), Some(addr.port())), addr));
        };

        if let Some(addr) = uri.user.as_deref().and_then(|user| self.registry.lookup_endpoint(user, Utc::now())) {
            debug!("Using registered address {} for {}", addr, uri);
            return Ok((uri, addr));
        }
        if let Some(addr) = uri.socket_addr() {
            return Ok((uri, addr));
        }
        let addr = tokio::net::lookup_host(uri.host_port())
            .await?
            .next()
            .ok_or_else(|| CallEngineError::protocol(format!("cannot resolve {}", uri.host_port())))?;
        Ok((uri, addr))
    }

    /// Waits for the INVITE's final response, retransmitting until the first
    /// response arrives, and gives up after the INVITE timeout.
    async fn drive_outbound(
        self,
        call_id: CallId,
        peer: SocketAddr,
        invite: Request,
        mut responses: mpsc::Receiver<Response>,
        lifetime: CancellationToken,
    ) {
        if let Err(e) = self.send_message(invite.clone(), peer).await {
            warn!("Failed to send INVITE: {}", e);
            self.fail_outbound(&call_id, None).await;
            return;
        }

        let signaling = &self.config.signaling;
        let deadline = Instant::now() + signaling.invite_timeout();
        let mut retransmit_interval = signaling.t1();
        let mut next_retransmit = Some(Instant::now() + retransmit_interval);
        let mut provisional = false;

        loop {
            tokio::select! {
                _ = lifetime.cancelled() => {
                    debug!("Stopped waiting for a response");
                    return;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    warn!("No final response within {:?}", signaling.invite_timeout());
                    let cancel = provisional.then(|| create_cancel(&invite));
                    self.fail_outbound(&call_id, None).await;
                    if let Some(cancel) = cancel {
                        let _ = self.send_message(cancel, peer).await;
                    }
                    return;
                }

                _ = tokio::time::sleep_until(next_retransmit.unwrap_or(deadline)), if next_retransmit.is_some() => {
                    debug!("Retransmitting INVITE");
                    if let Err(e) = self.send_message(invite.clone(), peer).await {
                        debug!("INVITE retransmission failed: {}", e);
                    }
                    retransmit_interval = (retransmit_interval * 2).min(signaling.t2());
                    next_retransmit = Some(Instant::now() + retransmit_interval);
                }

                response = responses.recv() => {
                    // The sender is dropped when the call goes terminal elsewhere
                    let Some(response) = response else {
                        return;
                    };
                    next_retransmit = None;
                    let status = response.status;

                    if status.is_provisional() {
                        provisional = true;
                        if status != StatusCode::Trying {
                            let _ = self.registry.with_outbound(&call_id, |call| {
                                call.transition(OutboundStatus::Ringing);
                                call.last_response = Some(response);
                            });
                        }
                        continue;
                    }

                    if status.is_success() {
                        self.answer_outbound(&call_id, peer, &invite, response).await;
                    } else {
                        info!("Call rejected with {} {}", status.as_u16(), response.reason_phrase());
                        let _ = self.send_message(create_ack_for_error(&invite, &response), peer).await;
                        self.fail_outbound(&call_id, Some(response)).await;
                    }
                    return;
                }
            }
        }
    }

    async fn fail_outbound(&self, call_id: &CallId, response: Option<Response>) {
        let failed = self.registry.with_outbound(call_id, |call| {
            if response.is_some() {
                call.last_response = response;
            }
            call.transition(OutboundStatus::Failed)
        });
        if matches!(failed, Ok(true)) {
            self.persist_outbound_end(call_id, CallRecordStatus::Failed).await;
        }
    }

    async fn answer_outbound(&self, call_id: &CallId, peer: SocketAddr, invite: &Request, response: Response) {
        let ack = create_ack_for_2xx(invite, &response, self.contact_addr());
        if let Err(e) = self.send_message(ack, peer).await {
            warn!("Failed to send ACK: {}", e);
        }

        let dialog = Dialog::for_outbound(invite, &response, peer);
        let peer_media = response
            .body_str()
            .and_then(|body| body.parse::<SessionDescription>().ok())
            .map(|sdp| sdp.media_addr());
        let answered = self.registry.with_outbound(call_id, |call| {
            if !call.transition(OutboundStatus::Answered) {
                return None;
            }
            call.last_response = Some(response.clone());
            call.dialog = dialog.clone();
            call.socket.clone().map(|socket| (socket, call.cancel.clone()))
        });

        let (socket, lifetime) = match answered {
            Ok(Some(started)) => started,
            _ => {
                // Cancelled while the 200 OK was in flight
                if let Some(mut dialog) = dialog {
                    info!("Answered after cancellation, sending BYE");
                    let bye = dialog.create_bye(self.contact_addr());
                    let _ = self.send_message(bye, dialog.peer).await;
                }
                return;
            }
        };

        info!("Call answered");
        let answered_at = Utc::now();
        persist_call(self.call_store.as_ref(), call_id, move |record| {
            record.status = CallRecordStatus::Answered;
            record.answered_at = Some(answered_at);
        })
        .await;

        match peer_media {
            Some(peer_media) => self.start_outbound_media(call_id, socket, peer_media, lifetime),
            None => warn!("200 OK carried no usable SDP answer, no media for this call"),
        }
    }

    /// Records the call in the background and plays the greeting, independently
    fn start_outbound_media(
        &self,
        call_id: &CallId,
        socket: CallMediaSocket,
        peer_media: SocketAddr,
        lifetime: CancellationToken,
    ) {
        let stream = MediaStream::new(call_id.clone(), socket, peer_media, lifetime.clone());
        let (audio_rx, _receiver) = stream.spawn_receiver(self.registry.clone());

        let path = recording_path(&self.config.media.recordings_dir, call_id);
        self.registry.set_recording_path(call_id, path.clone());
        let recorder = SharedRecorder::default();
        tokio::spawn(
            record_until_cancelled(call_id.clone(), audio_rx, recorder, path, lifetime).in_current_span(),
        );

        let greeting = self.config.media.greeting_clip.clone();
        tokio::spawn(
            async move {
                if let Some(clip) = load_optional_clip(greeting.as_deref()).await {
                    if let Err(e) = stream.send_ulaw(&clip).await {
                        warn!("Greeting playback failed: {}", e);
                    }
                }
            }
            .in_current_span(),
        );
    }
}
