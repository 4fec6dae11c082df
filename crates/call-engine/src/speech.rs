//! Speech service contracts: streaming recognizer, synthesizer and response
//! generator.
//!
//! Recognizers deliver results over a channel; [`recognize`] turns one session
//! into a single call with a deadline that also observes the call's lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use switchboard_codec_core::pcm;

use crate::error::{CallEngineError, Result};

/// Result delivered by a recognizer session
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Recognized text; `is_final` marks the last chunk of the utterance
    Text { text: String, is_final: bool },
    Error(String),
}

/// One utterance worth of streaming recognition
#[async_trait]
pub trait RecognizerSession: Send {
    /// Feeds 16-bit PCM at the recognizer's sample rate
    async fn push_audio(&mut self, samples: &[i16]) -> Result<()>;

    /// No more audio follows; the session delivers its final result
    async fn signal_end(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Opens a session; results arrive on the returned receiver
    async fn open_session(
        &self,
        correlation_id: &str,
    ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognitionEvent>)>;
}

/// PCM layout a synthesizer produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn mono16(sample_rate: u32) -> Self {
        Self { sample_rate, bits_per_sample: 16, channels: 1 }
    }

    /// Interprets little-endian PCM in this format as mono samples
    pub fn decode_pcm(&self, data: &[u8]) -> Result<Vec<i16>> {
        if self.bits_per_sample != 16 {
            return Err(CallEngineError::speech(format!(
                "unsupported synthesizer sample width: {} bits",
                self.bits_per_sample
            )));
        }
        let samples = pcm::bytes_to_samples(data);
        let channels = usize::from(self.channels.max(1));
        if channels == 1 {
            return Ok(samples);
        }
        Ok(samples
            .chunks(channels)
            .map(|frame| (frame.iter().map(|&s| i32::from(s)).sum::<i32>() / frame.len() as i32) as i16)
            .collect())
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn format(&self) -> AudioFormat;

    /// Raw PCM in [`Synthesizer::format`]
    async fn synthesize(&self, text: &str) -> Result<Bytes>;
}

/// Free-form reply generator
#[async_trait]
pub trait Responder: Send + Sync {
    async fn query(&self, text: &str, instructions: Option<&str>) -> Result<String>;
}

/// The services an automated call uses
#[derive(Clone)]
pub struct SpeechServices {
    pub recognizer: Arc<dyn Recognizer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub responder: Option<Arc<dyn Responder>>,
}

impl std::fmt::Debug for SpeechServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechServices")
            .field("synthesizer_format", &self.synthesizer.format())
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

/// Runs one recognition pass over `samples`.
///
/// Returns `Ok(None)` when nothing was recognized or the call's lifetime was
/// cancelled, and `Err(Timeout)` when no final result arrived within `timeout`.
pub async fn recognize(
    recognizer: &dyn Recognizer,
    correlation_id: &str,
    samples: &[i16],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    let exchange = async {
        let (mut session, mut results) = recognizer.open_session(correlation_id).await?;
        session.push_audio(samples).await?;
        session.signal_end().await?;

        let mut text = String::new();
        while let Some(event) = results.recv().await {
            match event {
                RecognitionEvent::Text { text: chunk, is_final } => {
                    trace!("Recognizer chunk (final={}): {}", is_final, chunk);
                    let chunk = chunk.trim();
                    if !chunk.is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(chunk);
                    }
                    if is_final {
                        break;
                    }
                }
                RecognitionEvent::Error(message) => return Err(CallEngineError::speech(message)),
            }
        }
        Ok(text)
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Recognition abandoned, call ended");
            Ok(None)
        }
        result = tokio::time::timeout(timeout, exchange) => match result {
            Ok(Ok(text)) if text.is_empty() => Ok(None),
            Ok(Ok(text)) => Ok(Some(text)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CallEngineError::Timeout(format!("recognizer gave no result within {timeout:?}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays scripted events once `signal_end` is called
    struct ScriptedRecognizer {
        events: Vec<RecognitionEvent>,
        hold_open: bool,
    }

    struct ScriptedSession {
        events: Vec<RecognitionEvent>,
        tx: Option<mpsc::Sender<RecognitionEvent>>,
        hold_open: bool,
    }

    #[async_trait]
    impl RecognizerSession for ScriptedSession {
        async fn push_audio(&mut self, _samples: &[i16]) -> Result<()> {
            Ok(())
        }

        async fn signal_end(&mut self) -> Result<()> {
            let tx = self.tx.take().unwrap();
            for event in self.events.drain(..) {
                tx.send(event).await.unwrap();
            }
            if self.hold_open {
                // Keep the channel open so the caller has to time out
                std::mem::forget(tx);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn open_session(
            &self,
            _correlation_id: &str,
        ) -> Result<(Box<dyn RecognizerSession>, mpsc::Receiver<RecognitionEvent>)> {
            let (tx, rx) = mpsc::channel(8);
            let session =
                ScriptedSession { events: self.events.clone(), tx: Some(tx), hold_open: self.hold_open };
            Ok((Box::new(session), rx))
        }
    }

    fn text(t: &str, is_final: bool) -> RecognitionEvent {
        RecognitionEvent::Text { text: t.to_string(), is_final }
    }

    #[tokio::test]
    async fn test_chunks_are_joined_until_final() {
        let recognizer =
            ScriptedRecognizer { events: vec![text("opening", false), text("hours", true)], hold_open: false };
        let result = recognize(&recognizer, "c1", &[0; 160], Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("opening hours"));
    }

    #[tokio::test]
    async fn test_empty_text_is_none() {
        let recognizer = ScriptedRecognizer { events: vec![text("  ", true)], hold_open: false };
        let result = recognize(&recognizer, "c1", &[], Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_error_event_propagates() {
        let recognizer = ScriptedRecognizer { events: vec![RecognitionEvent::Error("boom".into())], hold_open: false };
        let result = recognize(&recognizer, "c1", &[], Duration::from_secs(1), &CancellationToken::new()).await;
        assert!(matches!(result, Err(CallEngineError::Speech(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_cancel() {
        let recognizer = ScriptedRecognizer { events: vec![], hold_open: true };
        let result = recognize(&recognizer, "c1", &[], Duration::from_secs(15), &CancellationToken::new()).await;
        assert!(matches!(result, Err(CallEngineError::Timeout(_))));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = recognize(&recognizer, "c1", &[], Duration::from_secs(15), &cancel).await.unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_decode_stereo_pcm() {
        let format = AudioFormat { sample_rate: 24_000, bits_per_sample: 16, channels: 2 };
        let data = pcm::samples_to_bytes(&[100, 300, -200, -400]);
        assert_eq!(format.decode_pcm(&data).unwrap(), vec![200, -300]);
        let eight_bit = AudioFormat { bits_per_sample: 8, ..format };
        assert!(eight_bit.decode_pcm(&data).is_err());
    }
}
