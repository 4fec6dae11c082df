//! The call controller: shared state behind every signaling handler, and the
//! parts of call control that outlive a single request (session startup and
//! teardown).
//!
//! The per-verb handlers live in [`crate::protocol`], origination in
//! [`crate::origination`]; both are implemented on [`CallController`].

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use switchboard_infra_common::call_span;
use switchboard_rtp_core::MediaPortAllocator;
use switchboard_sip_core::prelude::*;
use switchboard_sip_transport::Transport;

use crate::config::ServerConfig;
use crate::conversation::Orchestrator;
use crate::error::{CallEngineError, Result};
use crate::media::{recording_path, MediaSession, MediaStream, SessionEnd};
use crate::policy::{AutomationPolicy, AutomationProfile};
use crate::registry::{CallRegistry, InboundCall, PendingInbound, RegistryStats};
use crate::speech::SpeechServices;
use crate::store::{persist_call, CallStore, Directory};
use crate::types::{CallId, CallRecordStatus};

/// External collaborators handed to the controller
#[derive(Clone)]
pub struct Collaborators {
    pub policy: Arc<dyn AutomationPolicy>,
    /// `None` accepts every registration
    pub directory: Option<Arc<dyn Directory>>,
    pub call_store: Arc<dyn CallStore>,
    /// `None` answers automated calls with plain media
    pub speech: Option<SpeechServices>,
}

/// Handle to the running call control; cheap to clone
#[derive(Clone)]
pub struct CallController {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) transport: Arc<dyn Transport>,
    /// Address the signaling socket is bound to
    pub(crate) bind_addr: SocketAddr,
    /// Address written into Via, Contact and SDP
    pub(crate) public_ip: IpAddr,
    pub(crate) registry: Arc<CallRegistry>,
    pub(crate) media_ports: MediaPortAllocator,
    pub(crate) policy: Arc<dyn AutomationPolicy>,
    pub(crate) directory: Option<Arc<dyn Directory>>,
    pub(crate) call_store: Arc<dyn CallStore>,
    pub(crate) speech: Option<SpeechServices>,
    /// Parent of every call lifetime
    pub(crate) shutdown: CancellationToken,
}

/// How an acknowledged inbound call is served
enum SessionMode {
    Conversation(Arc<AutomationProfile>, SpeechServices),
    Plain,
}

impl CallController {
    pub(crate) fn new(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        media_ports: MediaPortAllocator,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let bind_addr = transport.local_addr()?;
        let public_ip = advertised_ip(&config, bind_addr);
        let registry = CallRegistry::with_outbound_retention(config.signaling.outbound_retention());
        Ok(Self {
            config: Arc::new(config),
            transport,
            bind_addr,
            public_ip,
            registry: Arc::new(registry),
            media_ports,
            policy: collaborators.policy,
            directory: collaborators.directory,
            call_store: collaborators.call_store,
            speech: collaborators.speech,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Signaling address as seen by peers
    pub fn contact_addr(&self) -> SocketAddr {
        SocketAddr::new(self.public_ip, self.bind_addr.port())
    }

    /// True when `addr` reaches this server's own signaling socket
    pub(crate) fn is_own_address(&self, addr: SocketAddr) -> bool {
        if addr.port() != self.bind_addr.port() {
            return false;
        }
        let ip = addr.ip();
        ip == self.bind_addr.ip()
            || ip == self.public_ip
            || (self.bind_addr.ip().is_unspecified() && (ip.is_loopback() || ip.is_unspecified()))
    }

    pub(crate) async fn send_message(&self, message: impl Into<Message>, destination: SocketAddr) -> Result<()> {
        self.transport.send_message(message.into(), destination).await?;
        Ok(())
    }

    /// Sends a response without a body
    pub(crate) async fn respond(&self, request: &Request, status: StatusCode, destination: SocketAddr) -> Result<()> {
        self.send_message(create_response(request, status), destination).await
    }

    /// Cancels every call lifetime and closes the signaling socket
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down call control");
        self.shutdown.cancel();
        self.transport.close().await?;
        Ok(())
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // -- inbound session lifecycle -------------------------------------------

    /// Turns an acknowledged pending call into an active one and starts serving it
    pub(crate) fn start_inbound_session(&self, pending: PendingInbound) {
        let call_id = pending.call_id.clone();
        let cancel = self.shutdown.child_token();
        let (digits_tx, digits_rx) = mpsc::channel(self.config.media.digit_buffer.max(1));
        self.registry.insert_inbound(InboundCall::new(&pending, cancel.clone(), digits_tx));

        let stream = MediaStream::with_event_payload_type(
            call_id.clone(),
            pending.socket.clone(),
            pending.peer_media,
            pending.event_payload_type,
            cancel.clone(),
        );
        let (audio_rx, _receiver) = stream.spawn_receiver(self.registry.clone());
        let mode = self.session_mode(&pending);

        let controller = self.clone();
        let span = call_span("call", call_id.as_str());
        tokio::spawn(
            async move {
                let answered_at = Utc::now();
                persist_call(controller.call_store.as_ref(), &call_id, move |record| {
                    if record.status == CallRecordStatus::Ringing {
                        record.status = CallRecordStatus::Answered;
                        record.answered_at = Some(answered_at);
                    }
                })
                .await;

                let hang_up = match mode {
                    SessionMode::Conversation(profile, services) => {
                        let path = recording_path(&controller.config.media.recordings_dir, &call_id);
                        let orchestrator = Orchestrator::new(
                            stream,
                            audio_rx,
                            profile,
                            services,
                            controller.config.conversation.clone(),
                            path,
                            controller.registry.clone(),
                        );
                        orchestrator.run().await.requires_hangup()
                    }
                    SessionMode::Plain => {
                        let session = MediaSession::new(
                            stream,
                            audio_rx,
                            digits_rx,
                            controller.config.media.clone(),
                            controller.registry.clone(),
                        );
                        match session.run().await {
                            Ok(SessionEnd::IdleTimeout) => true,
                            Ok(end) => {
                                debug!("Media session ended: {:?}", end);
                                false
                            }
                            Err(e) => {
                                warn!("Media session failed: {}", e);
                                true
                            }
                        }
                    }
                };

                if hang_up && !cancel.is_cancelled() {
                    if let Err(e) = controller.hang_up_inbound(&call_id).await {
                        debug!("Hang-up skipped: {}", e);
                    }
                }
            }
            .instrument(span),
        );
    }

    fn session_mode(&self, pending: &PendingInbound) -> SessionMode {
        if !pending.automated {
            return SessionMode::Plain;
        }
        match (&pending.profile, &self.speech) {
            (Some(profile), Some(services)) => SessionMode::Conversation(profile.clone(), services.clone()),
            (None, _) => {
                self.registry.record_automation_fallback();
                warn!(call_id = %pending.call_id, "Automated call has no automation profile, answering with plain media");
                SessionMode::Plain
            }
            (Some(_), None) => {
                self.registry.record_automation_fallback();
                warn!(call_id = %pending.call_id, "Automated call but no speech services configured, answering with plain media");
                SessionMode::Plain
            }
        }
    }

    /// Server-initiated hang-up of an active inbound call
    pub async fn hang_up_inbound(&self, call_id: &CallId) -> Result<()> {
        let mut call = self
            .registry
            .remove_inbound(call_id)
            .ok_or_else(|| CallEngineError::not_found(call_id))?;
        let bye = call.dialog.create_bye(self.contact_addr());
        let peer = call.dialog.peer;
        info!(call_id = %call_id, "Hanging up");
        self.end_inbound(call, CallRecordStatus::Ended).await;
        self.send_message(bye, peer).await
    }

    /// Tears down a call already removed from the registry.
    ///
    /// Cancels the lifetime (stopping every task of the call), persists the
    /// end, and attaches the recording after the grace delay.
    pub(crate) async fn end_inbound(&self, call: InboundCall, status: CallRecordStatus) {
        call.cancel.cancel();
        let call_id = call.call_id.clone();
        let recording = call.recording_path.clone();
        drop(call);

        let ended_at = Utc::now();
        persist_call(self.call_store.as_ref(), &call_id, move |record| record.mark_ended(status, ended_at)).await;
        info!(call_id = %call_id, "Call ended ({:?})", status);

        if let Some(path) = recording {
            self.attach_recording_later(call_id, path);
        }
    }

    /// Waits for the recording to be flushed, then writes its path to the call record
    pub(crate) fn attach_recording_later(&self, call_id: CallId, path: PathBuf) {
        let grace = self.config.media.recording_grace();
        let store = self.call_store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!(call_id = %call_id, "No recording at {}", path.display());
                return;
            }
            persist_call(store.as_ref(), &call_id, move |record| record.recording_path = Some(path)).await;
        });
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("bind_addr", &self.bind_addr)
            .field("public_ip", &self.public_ip)
            .field("registry", &self.registry)
            .finish()
    }
}

/// SDP `o=` session id for a new description
pub(crate) fn sdp_session_id() -> u64 {
    Utc::now().timestamp_micros().unsigned_abs()
}

/// Configured public IP, else the bound IP, else the media IP, else loopback
fn advertised_ip(config: &ServerConfig, bind_addr: SocketAddr) -> IpAddr {
    if let Some(ip) = config.signaling.public_ip {
        return ip;
    }
    if !bind_addr.ip().is_unspecified() {
        return bind_addr.ip();
    }
    if !config.media.bind_ip.is_unspecified() {
        return config.media.bind_ip;
    }
    IpAddr::from([127, 0, 0, 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertised_ip_prefers_configured_public_ip() {
        let mut config = ServerConfig::default();
        let bound: SocketAddr = "0.0.0.0:5060".parse().unwrap();
        assert_eq!(advertised_ip(&config, bound), IpAddr::from([127, 0, 0, 1]));

        assert_eq!(advertised_ip(&config, "10.1.1.1:5060".parse().unwrap()), IpAddr::from([10, 1, 1, 1]));

        config.signaling.public_ip = Some(IpAddr::from([203, 0, 113, 7]));
        assert_eq!(advertised_ip(&config, bound), IpAddr::from([203, 0, 113, 7]));
    }
}
