//! # switchboard-call-engine
//!
//! Call control for a small SIP PBX with an AI attendant.
//!
//! Inbound calls are answered over UDP signaling with one RTP socket per call.
//! Plain calls get a greeting, a short recording played back, and a DTMF menu.
//! Automated calls are handed to a conversational orchestrator that listens,
//! transcribes, picks a reply and speaks it back, optionally ending in a
//! "leave a message" phase. Outbound calls can be originated, cancelled and
//! hung up through [`CallController`].
//!
//! ## Layout
//!
//! - [`controller`] / [`protocol`]: the call-control state machine, one
//!   handler per SIP verb
//! - [`origination`]: outbound calls and their status machine
//! - [`registry`]: pending, active and outbound calls plus registered endpoints
//! - [`media`]: per-call RTP stream, clips, recording, the plain media session
//! - [`conversation`]: buffering, recognition pipeline, replies, orchestrator
//! - [`speech`] / [`providers`]: speech service contracts and HTTP adapters
//! - [`store`] / [`policy`]: directory, call history and automation policy
//! - [`server`]: bootstrap and the transport loop

pub mod config;
pub mod controller;
pub mod conversation;
pub mod dialog;
pub mod error;
pub mod media;
pub mod origination;
pub mod policy;
pub mod protocol;
pub mod providers;
pub mod registry;
pub mod server;
pub mod speech;
pub mod store;
pub mod types;

pub use config::ServerConfig;
pub use controller::{CallController, Collaborators};
pub use error::{CallEngineError, Result};
pub use registry::{CallRegistry, RegistryStats};
pub use server::{SwitchboardServer, SwitchboardServerBuilder};
pub use types::{CallId, CallRecord, CallRecordStatus, OutboundCallSnapshot, OutboundStatus};

/// Commonly used items
pub mod prelude {
    pub use crate::config::{
        AutomationConfig, ConversationConfig, DirectoryConfig, MediaConfig, ServerConfig, SignalingConfig,
        SpeechConfig,
    };
    pub use crate::controller::{CallController, Collaborators};
    pub use crate::conversation::{ConversationEnd, Reply, ReplySource};
    pub use crate::error::{CallEngineError, Result};
    pub use crate::media::SessionEnd;
    pub use crate::policy::{AutomationPolicy, AutomationProfile, KeywordRule, StaticAutomationPolicy};
    pub use crate::registry::{CallRegistry, DigitDelivery, RegistryStats};
    pub use crate::server::{SwitchboardServer, SwitchboardServerBuilder};
    pub use crate::speech::{
        AudioFormat, RecognitionEvent, Recognizer, RecognizerSession, Responder, SpeechServices, Synthesizer,
    };
    pub use crate::store::{CallStore, Directory, InMemoryCallStore, InMemoryDirectory};
    pub use crate::types::{
        CallDirection, CallId, CallRecord, CallRecordStatus, OutboundCallSnapshot, OutboundStatus, UserRecord,
    };
}
