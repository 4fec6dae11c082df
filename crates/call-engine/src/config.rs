//! Server configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! server on `0.0.0.0:5060` with RTP ports 20000-20999.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_infra_common::LoggingConfig;

use crate::error::{CallEngineError, Result};
use crate::policy::AutomationProfile;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub signaling: SignalingConfig,
    pub media: MediaConfig,
    pub conversation: ConversationConfig,
    pub automation: AutomationConfig,
    pub directory: DirectoryConfig,
    pub speech: SpeechConfig,
    pub logging: LoggingConfig,
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CallEngineError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let media = &self.media;
        if media.rtp_port_start != 0 && media.rtp_port_start > media.rtp_port_end {
            return Err(CallEngineError::config(format!(
                "media.rtp_port_start ({}) exceeds media.rtp_port_end ({})",
                media.rtp_port_start, media.rtp_port_end
            )));
        }
        let conv = &self.conversation;
        if conv.fast_threshold_ms > conv.hard_ceiling_ms {
            return Err(CallEngineError::config(
                "conversation.fast_threshold_ms must not exceed conversation.hard_ceiling_ms",
            ));
        }
        if conv.min_buffer_ms > conv.fast_threshold_ms {
            return Err(CallEngineError::config(
                "conversation.min_buffer_ms must not exceed conversation.fast_threshold_ms",
            ));
        }
        if conv.max_gain < 1.0 {
            return Err(CallEngineError::config("conversation.max_gain must be at least 1.0"));
        }
        Ok(())
    }
}

/// `[signaling]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub bind_addr: SocketAddr,
    /// Address written into Via, Contact and SDP; defaults to the bound IP
    pub public_ip: Option<IpAddr>,
    pub user_agent: String,
    /// Ceiling on an outbound INVITE exchange
    pub invite_timeout_ms: u64,
    /// Retransmission base interval (RFC 3261 T1)
    pub t1_ms: u64,
    /// Retransmission interval cap (RFC 3261 T2)
    pub t2_ms: u64,
    /// How long an unacknowledged 200 OK is retransmitted
    pub ack_wait_ms: u64,
    /// How long a finished outbound call stays available to `status`
    pub outbound_retention_ms: u64,
    pub default_register_expires: u32,
    pub max_register_expires: u32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5060),
            public_ip: None,
            user_agent: "switchboard".to_string(),
            invite_timeout_ms: 30_000,
            t1_ms: 500,
            t2_ms: 4_000,
            ack_wait_ms: 32_000,
            outbound_retention_ms: 300_000,
            default_register_expires: 3600,
            max_register_expires: 7200,
        }
    }
}

impl SignalingConfig {
    pub fn invite_timeout(&self) -> Duration {
        Duration::from_millis(self.invite_timeout_ms)
    }

    pub fn t1(&self) -> Duration {
        Duration::from_millis(self.t1_ms)
    }

    pub fn t2(&self) -> Duration {
        Duration::from_millis(self.t2_ms)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    pub fn outbound_retention(&self) -> Duration {
        Duration::from_millis(self.outbound_retention_ms)
    }
}

/// `[media]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub bind_ip: IpAddr,
    /// First port of the per-call RTP range; 0 lets the OS choose
    pub rtp_port_start: u16,
    pub rtp_port_end: u16,
    /// Clip streamed when a plain media session starts
    pub greeting_clip: Option<PathBuf>,
    /// Keypad digit to clip played in the listening phase
    pub digit_clips: HashMap<String, PathBuf>,
    pub record_max_ms: u64,
    /// Silence after speech that ends the recording step
    pub record_silence_stop_ms: u64,
    /// Mean amplitude separating speech from silence
    pub voice_energy_threshold: f64,
    pub dtmf_idle_timeout_ms: u64,
    pub recordings_dir: PathBuf,
    /// Wait after termination before the recording path is attached
    pub recording_grace_ms: u64,
    /// Digit channel capacity per call
    pub digit_buffer: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            rtp_port_start: 20_000,
            rtp_port_end: 20_999,
            greeting_clip: None,
            digit_clips: HashMap::new(),
            record_max_ms: 10_000,
            record_silence_stop_ms: 1_500,
            voice_energy_threshold: 300.0,
            dtmf_idle_timeout_ms: 60_000,
            recordings_dir: PathBuf::from("recordings"),
            recording_grace_ms: 2_000,
            digit_buffer: 10,
        }
    }
}

impl MediaConfig {
    pub fn dtmf_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.dtmf_idle_timeout_ms)
    }

    pub fn recording_grace(&self) -> Duration {
        Duration::from_millis(self.recording_grace_ms)
    }

    pub fn digit_clip(&self, digit: char) -> Option<&PathBuf> {
        self.digit_clips.get(digit.to_string().as_str())
    }
}

/// `[conversation]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Buffer length that triggers recognition once voice was heard
    pub fast_threshold_ms: u64,
    /// Buffer length that triggers recognition unconditionally
    pub hard_ceiling_ms: u64,
    /// Shortest buffer the silence trigger may flush
    pub min_buffer_ms: u64,
    /// Consecutive silent 20 ms chunks that end an utterance
    pub silent_chunks: u32,
    /// Mean amplitude (8 kHz PCM) above which a chunk counts as voice
    pub voice_energy_threshold: f64,
    /// Buffers shorter than this are discarded before recognition
    pub min_signal_ms: u64,
    /// Peak below which gain is applied
    pub gain_peak_floor: u16,
    /// Peak the gain stage aims for
    pub gain_target_peak: u16,
    pub max_gain: f32,
    /// Mean amplitude (after gain) below which the buffer is skipped as silence
    pub silence_energy_floor: f64,
    pub recognizer_sample_rate: u32,
    pub recognizer_timeout_ms: u64,
    /// Ceiling for each response-generation and synthesis request
    pub service_timeout_ms: u64,
    /// Turns before the message phase (recording on) or hang-up (recording off)
    pub max_turns: u32,
    pub message_window_secs: u64,
    pub end_call_grace_ms: u64,
    /// `{seconds}` is replaced with the message window
    pub message_notice: String,
    /// Interval of the buffer flush timer
    pub flush_interval_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            fast_threshold_ms: 1_500,
            hard_ceiling_ms: 2_500,
            min_buffer_ms: 500,
            silent_chunks: 40,
            voice_energy_threshold: 300.0,
            min_signal_ms: 100,
            gain_peak_floor: 8_000,
            gain_target_peak: 16_000,
            max_gain: 4.0,
            silence_energy_floor: 100.0,
            recognizer_sample_rate: 16_000,
            recognizer_timeout_ms: 15_000,
            service_timeout_ms: 15_000,
            max_turns: 2,
            message_window_secs: 15,
            end_call_grace_ms: 2_000,
            message_notice: "You have {seconds} seconds to leave a message after this.".to_string(),
            flush_interval_ms: 200,
        }
    }
}

impl ConversationConfig {
    pub fn recognizer_timeout(&self) -> Duration {
        Duration::from_millis(self.recognizer_timeout_ms)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    pub fn message_window(&self) -> Duration {
        Duration::from_secs(self.message_window_secs)
    }

    pub fn end_call_grace(&self) -> Duration {
        Duration::from_millis(self.end_call_grace_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(20))
    }

    pub fn notice_text(&self) -> String {
        self.message_notice.replace("{seconds}", &self.message_window_secs.to_string())
    }
}

/// `[automation]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Called users routed to the attendant (users with a profile are implied)
    pub automated_users: Vec<String>,
    pub profiles: HashMap<String, AutomationProfile>,
}

/// `[directory]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// When false, every REGISTER is accepted
    pub enabled: bool,
    pub users: Vec<DirectoryUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub username: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// `[speech]`: OpenAI-compatible HTTP endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Read when `api_key` is unset
    pub api_key_env: String,
    pub api_key: Option<String>,
    pub transcription_model: String,
    pub language: Option<String>,
    pub synthesis_model: String,
    pub voice: String,
    pub response_model: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            transcription_model: "whisper-1".to_string(),
            language: None,
            synthesis_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            response_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl SpeechConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| std::env::var(&self.api_key_env).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_documented_timings() {
        let config = ServerConfig::default();
        assert_eq!(config.signaling.invite_timeout(), Duration::from_secs(30));
        assert_eq!(config.conversation.recognizer_timeout(), Duration::from_secs(15));
        assert_eq!(config.conversation.message_window(), Duration::from_secs(15));
        assert_eq!(config.media.dtmf_idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.conversation.silent_chunks * 20, 800);
        assert_eq!(config.conversation.max_gain, 4.0);
    }

    #[test]
    fn test_parse_partial_toml() {
        let text = r#"
            [signaling]
            bind_addr = "127.0.0.1:5080"

            [media]
            rtp_port_start = 30000
            rtp_port_end = 30100
            digit_clips = { "1" = "clips/sales.wav" }

            [automation]
            automated_users = ["300"]

            [automation.profiles.100]
            free_form = true
            recording = true
            fallback_message = "Sorry, could you repeat that?"
            keywords = [{ keyword = "hours", reply = "Nine to five." }]

            [logging]
            level = "debug"
        "#;
        let config = ServerConfig::from_toml_str(text).unwrap();
        assert_eq!(config.signaling.bind_addr, "127.0.0.1:5080".parse().unwrap());
        assert_eq!(config.media.digit_clip('1'), Some(&PathBuf::from("clips/sales.wav")));
        let profile = &config.automation.profiles["100"];
        assert!(profile.free_form && profile.recording);
        assert_eq!(profile.keyword_reply("opening hours"), Some("Nine to five."));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.conversation.fast_threshold_ms, 1_500);
    }

    #[test]
    fn test_validation() {
        assert!(ServerConfig::from_toml_str("[media]\nrtp_port_start = 5000\nrtp_port_end = 4000").is_err());
        assert!(ServerConfig::from_toml_str("[conversation]\nmax_gain = 0.5").is_err());
        assert!(ServerConfig::from_toml_str("[signaling]\nbind_addr = 12").is_err());
    }

    #[test]
    fn test_notice_text() {
        let conv = ConversationConfig::default();
        assert_eq!(conv.notice_text(), "You have 15 seconds to leave a message after this.");
    }
}
