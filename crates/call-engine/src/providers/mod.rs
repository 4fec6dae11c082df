//! Concrete speech service adapters.

pub mod openai;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::speech::SpeechServices;

pub use openai::{HttpResponder, HttpSynthesizer, HttpTranscriber};

/// Speech services described by the configuration, if any
pub fn speech_services_from_config(config: &ServerConfig) -> Option<SpeechServices> {
    let (transcriber, synthesizer, responder) =
        openai::from_config(&config.speech, config.conversation.recognizer_sample_rate)?;
    Some(SpeechServices {
        recognizer: Arc::new(transcriber),
        synthesizer: Arc::new(synthesizer),
        responder: Some(Arc::new(responder)),
    })
}
