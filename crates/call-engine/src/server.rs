//! # Switchboard Server
//!
//! Wires the configuration, the UDP signaling transport, the media port range
//! and the external collaborators into a [`CallController`], and runs the
//! loop that hands every received SIP message to it.
//!
//! ```no_run
//! use switchboard_call_engine::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::load("switchboard.toml")?;
//! let server = SwitchboardServerBuilder::new().with_config(config).build().await?;
//!
//! let calls = server.controller();
//! tokio::spawn(server.run());
//!
//! let call_id = calls.originate("sip:bob@192.0.2.10:5060").await?;
//! println!("{:?}", calls.status(&call_id)?);
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use switchboard_rtp_core::MediaPortAllocator;
use switchboard_sip_transport::{TransportEvent, UdpTransport};

use crate::config::ServerConfig;
use crate::controller::{CallController, Collaborators};
use crate::error::Result;
use crate::policy::{AutomationPolicy, StaticAutomationPolicy};
use crate::providers::speech_services_from_config;
use crate::speech::SpeechServices;
use crate::store::{CallStore, Directory, InMemoryCallStore, InMemoryDirectory};
use crate::types::UserRecord;

/// A bound, ready-to-run switchboard
pub struct SwitchboardServer {
    controller: CallController,
    events: mpsc::Receiver<TransportEvent>,
}

impl SwitchboardServer {
    pub fn controller(&self) -> CallController {
        self.controller.clone()
    }

    /// Signaling address the transport is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.controller.bind_addr
    }

    /// Dispatches received messages until the transport closes.
    ///
    /// Each message is handled on its own task, so a slow handler never
    /// holds up the next datagram.
    pub async fn run(mut self) -> Result<()> {
        info!("Switchboard listening on {}", self.local_addr());
        while let Some(event) = self.events.recv().await {
            match event {
                TransportEvent::MessageReceived { message, source, .. } => {
                    let controller = self.controller.clone();
                    tokio::spawn(async move { controller.handle_message(message, source).await });
                }
                TransportEvent::Error { error } => debug!("Transport error: {}", error),
                TransportEvent::Closed => break,
            }
            if self.controller.is_shut_down() {
                break;
            }
        }
        info!("Switchboard stopped");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.controller.shutdown().await
    }
}

impl std::fmt::Debug for SwitchboardServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchboardServer").field("controller", &self.controller).finish()
    }
}

/// Builder for [`SwitchboardServer`].
///
/// Collaborators not supplied explicitly come from the configuration: the
/// `[automation]` table, the `[directory]` user list, the `[speech]` HTTP
/// endpoints, and an in-memory call store.
#[derive(Default)]
pub struct SwitchboardServerBuilder {
    config: ServerConfig,
    policy: Option<Arc<dyn AutomationPolicy>>,
    directory: Option<Arc<dyn Directory>>,
    call_store: Option<Arc<dyn CallStore>>,
    speech: Option<SpeechServices>,
}

impl SwitchboardServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn AutomationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_call_store(mut self, call_store: Arc<dyn CallStore>) -> Self {
        self.call_store = Some(call_store);
        self
    }

    pub fn with_speech(mut self, speech: SpeechServices) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Binds the signaling socket and assembles the controller
    pub async fn build(self) -> Result<SwitchboardServer> {
        let config = self.config;
        config.validate()?;

        let (transport, events) = UdpTransport::bind(config.signaling.bind_addr, None).await?;

        let media = &config.media;
        let media_ports = if media.rtp_port_start == 0 {
            MediaPortAllocator::ephemeral(media.bind_ip)
        } else {
            MediaPortAllocator::new(media.bind_ip, media.rtp_port_start, media.rtp_port_end)?
        };

        let policy = self.policy.unwrap_or_else(|| {
            Arc::new(StaticAutomationPolicy::new(
                config.automation.automated_users.clone(),
                config.automation.profiles.clone(),
            ))
        });
        let directory = self.directory.or_else(|| {
            config.directory.enabled.then(|| {
                let users = config.directory.users.iter().map(|entry| {
                    let mut user = UserRecord::new(entry.username.clone());
                    user.enabled = entry.enabled;
                    user
                });
                Arc::new(InMemoryDirectory::with_users(users)) as Arc<dyn Directory>
            })
        });
        let call_store = self
            .call_store
            .unwrap_or_else(|| Arc::new(InMemoryCallStore::new()));
        let speech = self.speech.or_else(|| speech_services_from_config(&config));
        if speech.is_none() && !config.automation.profiles.is_empty() {
            warn!("Automation profiles configured but no speech services; automated calls get plain media");
        }

        let controller = CallController::new(
            config,
            Arc::new(transport),
            media_ports,
            Collaborators { policy, directory, call_store, speech },
        )?;
        Ok(SwitchboardServer { controller, events })
    }
}
