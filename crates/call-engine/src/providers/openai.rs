//! OpenAI-compatible HTTP adapters for the speech contracts.
//!
//! - transcription: `POST {base}/audio/transcriptions` (multipart WAV)
//! - synthesis: `POST {base}/audio/speech` with `response_format = "pcm"` (24 kHz mono)
//! - responses: `POST {base}/chat/completions`

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use switchboard_codec_core::wav::encode_wav;

use crate::config::SpeechConfig;
use crate::error::{CallEngineError, Result};
use crate::speech::{AudioFormat, RecognitionEvent, Recognizer, RecognizerSession, Responder, Synthesizer};

/// Sample rate of `response_format = "pcm"` speech
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    api_key: String,
}

impl Endpoint {
    fn new(base_url: &str, api_key: String) -> Self {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap_or_default();
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).header("Authorization", format!("Bearer {}", self.api_key))
    }
}

async fn check_status(resp: Response, what: &str) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(CallEngineError::speech(format!("{what} {status}: {body}")))
}

// ---------------------------------------------------------------------------
// Transcription
// ---------------------------------------------------------------------------

/// Transcription endpoint behind the streaming recognizer contract.
///
/// Audio pushed into a session is buffered and posted as one WAV file when the
/// session ends; the transcript arrives as a single final event.
#[derive(Clone)]
pub struct HttpTranscriber {
    endpoint: Endpoint,
    model: String,
    language: Option<String>,
    sample_rate: u32,
}

impl HttpTranscriber {
    pub fn new(base_url: &str, api_key: String, model: impl Into<String>, sample_rate: u32) -> Self {
        Self { endpoint: Endpoint::new(base_url, api_key), model: model.into(), language: None, sample_rate }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    async fn transcribe(&self, correlation_id: &str, samples: &[i16]) -> Result<String> {
        let wav = encode_wav(self.sample_rate, samples)?;
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name(format!("{correlation_id}.wav"))
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        debug!(model = %self.model, samples = samples.len(), "Posting audio for transcription");
        let resp = self.endpoint.post("audio/transcriptions").multipart(form).send().await?;
        let transcript: TranscriptionResponse = check_status(resp, "transcription").await?.json().await?;
        Ok(transcript.text)
    }
}

#[async_trait]
impl Recognizer for HttpTranscriber {
    async fn open_session(
        &self,
        correlation_id: &str,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognitionEvent>)> {
        let (tx, rx) = mpsc::channel(4);
        let session = TranscriptionSession {
            transcriber: self.clone(),
            correlation_id: correlation_id.to_string(),
            samples: Vec::new(),
            results: Some(tx),
        };
        Ok((Box::new(session), rx))
    }
}

struct TranscriptionSession {
    transcriber: HttpTranscriber,
    correlation_id: String,
    samples: Vec<i16>,
    results: Option<mpsc::Sender<RecognitionEvent>>,
}

#[async_trait]
impl RecognizerSession for TranscriptionSession {
    async fn push_audio(&mut self, samples: &[i16]) -> Result<()> {
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    async fn signal_end(&mut self) -> Result<()> {
        let Some(results) = self.results.take() else {
            return Err(CallEngineError::invalid_state("recognizer session already ended"));
        };
        let transcriber = self.transcriber.clone();
        let correlation_id = self.correlation_id.clone();
        let samples = std::mem::take(&mut self.samples);
        tokio::spawn(async move {
            let event = match transcriber.transcribe(&correlation_id, &samples).await {
                Ok(text) => RecognitionEvent::Text { text, is_final: true },
                Err(e) => {
                    warn!(call_id = %correlation_id, "Transcription failed: {}", e);
                    RecognitionEvent::Error(e.to_string())
                }
            };
            // The receiver is gone when the caller gave up waiting
            let _ = results.send(event).await;
        });
        Ok(())
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

pub struct HttpSynthesizer {
    endpoint: Endpoint,
    model: String,
    voice: String,
}

impl HttpSynthesizer {
    pub fn new(base_url: &str, api_key: String, model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self { endpoint: Endpoint::new(base_url, api_key), model: model.into(), voice: voice.into() }
    }
}

#[derive(Serialize)]
struct SpeechPayload<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    fn format(&self) -> AudioFormat {
        AudioFormat::mono16(SYNTHESIS_SAMPLE_RATE)
    }

    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        let payload = SpeechPayload { model: &self.model, input: text, voice: &self.voice, response_format: "pcm" };
        debug!(model = %self.model, voice = %self.voice, chars = text.len(), "Synthesizing reply");
        let resp = self.endpoint.post("audio/speech").json(&payload).send().await?;
        Ok(check_status(resp, "synthesis").await?.bytes().await?)
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub struct HttpResponder {
    endpoint: Endpoint,
    model: String,
}

impl HttpResponder {
    pub fn new(base_url: &str, api_key: String, model: impl Into<String>) -> Self {
        Self { endpoint: Endpoint::new(base_url, api_key), model: model.into() }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

fn chat_messages<'a>(text: &'a str, instructions: Option<&'a str>) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(2);
    if let Some(instructions) = instructions {
        messages.push(ChatMessage { role: "system", content: instructions });
    }
    messages.push(ChatMessage { role: "user", content: text });
    messages
}

#[async_trait]
impl Responder for HttpResponder {
    async fn query(&self, text: &str, instructions: Option<&str>) -> Result<String> {
        let payload = ChatPayload { model: &self.model, messages: chat_messages(text, instructions) };
        let resp = self.endpoint.post("chat/completions").json(&payload).send().await?;
        let reply: ChatResponse = check_status(resp, "chat completion").await?.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| CallEngineError::speech("chat completion returned no content"))
    }
}

/// Builds the three adapters from `[speech]`; `None` when disabled or no key is available
pub fn from_config(config: &SpeechConfig, recognizer_rate: u32) -> Option<(HttpTranscriber, HttpSynthesizer, HttpResponder)> {
    if !config.enabled {
        return None;
    }
    let Some(api_key) = config.resolved_api_key() else {
        warn!("Speech services enabled but no API key found in config or ${}", config.api_key_env);
        return None;
    };
    let transcriber = HttpTranscriber::new(&config.base_url, api_key.clone(), &config.transcription_model, recognizer_rate)
        .with_language(config.language.clone());
    let synthesizer = HttpSynthesizer::new(&config.base_url, api_key.clone(), &config.synthesis_model, &config.voice);
    let responder = HttpResponder::new(&config.base_url, api_key, &config.response_model);
    Some((transcriber, synthesizer, responder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let endpoint = Endpoint::new("http://localhost:8080/v1/", "sk-test".into());
        assert_eq!(endpoint.url("audio/speech"), "http://localhost:8080/v1/audio/speech");
    }

    #[test]
    fn test_chat_payload_shape() {
        let payload = ChatPayload { model: "m", messages: chat_messages("hi", Some("be brief")) };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");

        let payload = ChatPayload { model: "m", messages: chat_messages("hi", None) };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":" Nine to five. "}}]}"#;
        let reply: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.choices[0].message.content.as_deref(), Some(" Nine to five. "));
    }

    #[test]
    fn test_synthesizer_format() {
        let synth = HttpSynthesizer::new("http://localhost", "k".into(), "tts-1", "alloy");
        assert_eq!(synth.format(), AudioFormat::mono16(24_000));
    }

    #[test]
    fn test_from_config_requires_enable_and_key() {
        let mut config = SpeechConfig::default();
        assert!(from_config(&config, 16_000).is_none());
        config.enabled = true;
        config.api_key = Some("sk-test".into());
        assert!(from_config(&config, 16_000).is_some());
    }

    #[tokio::test]
    async fn test_session_cannot_end_twice() {
        let transcriber = HttpTranscriber::new("http://127.0.0.1:9", "k".into(), "whisper-1", 16_000);
        let (mut session, _rx) = transcriber.open_session("c1").await.unwrap();
        session.signal_end().await.unwrap();
        assert!(session.signal_end().await.is_err());
    }
}
