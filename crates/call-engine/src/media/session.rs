//! Plain media session for inbound calls that are not automated.
//!
//! greeting → record → playback → DTMF menu. Every step observes the call's
//! lifetime; a missing clip skips its step.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use switchboard_codec_core::{g711, pcm};

use crate::config::MediaConfig;
use crate::error::Result;
use crate::media::clip::{load_clip, load_optional_clip};
use crate::media::recorder::{recording_path, save_recording};
use crate::media::stream::{MediaStream, SendOutcome};
use crate::registry::CallRegistry;

/// Why a media session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The call's lifetime was cancelled (BYE, CANCEL or shutdown)
    Cancelled,
    /// No digit within the idle timeout; the caller should hang up
    IdleTimeout,
    /// The digit channel closed
    DigitsClosed,
}

pub struct MediaSession {
    stream: Arc<MediaStream>,
    audio: mpsc::Receiver<Bytes>,
    digits: mpsc::Receiver<char>,
    config: MediaConfig,
    registry: Arc<CallRegistry>,
}

impl MediaSession {
    pub fn new(
        stream: Arc<MediaStream>,
        audio: mpsc::Receiver<Bytes>,
        digits: mpsc::Receiver<char>,
        config: MediaConfig,
        registry: Arc<CallRegistry>,
    ) -> Self {
        Self { stream, audio, digits, config, registry }
    }

    pub async fn run(mut self) -> Result<SessionEnd> {
        let call_id = self.stream.call_id().clone();
        info!(call_id = %call_id, "Media session started");

        if let Some(greeting) = load_optional_clip(self.config.greeting_clip.as_deref()).await {
            if self.stream.send_ulaw(&greeting).await? == SendOutcome::Cancelled {
                return Ok(SessionEnd::Cancelled);
            }
        }

        let Some(recorded) = self.record().await else {
            return Ok(SessionEnd::Cancelled);
        };
        debug!(call_id = %call_id, "Recorded {} ms", pcm::duration_ms(recorded.len(), g711::SAMPLE_RATE));

        if !recorded.is_empty() {
            let path = recording_path(&self.config.recordings_dir, &call_id);
            self.registry.set_recording_path(&call_id, path.clone());
            if let Err(e) = save_recording(path, recorded.clone()).await {
                warn!(call_id = %call_id, "Failed to save recording: {}", e);
            }
            if self.stream.send_pcm(&recorded, g711::SAMPLE_RATE).await? == SendOutcome::Cancelled {
                return Ok(SessionEnd::Cancelled);
            }
        }

        self.listen_for_digits().await
    }

    /// Records until the maximum length, or until silence follows speech.
    /// `None` when the call ended meanwhile.
    async fn record(&mut self) -> Option<Vec<i16>> {
        let cancel = self.stream.lifetime().clone();
        let deadline = Instant::now() + Duration::from_millis(self.config.record_max_ms);
        let silence_stop = self.config.record_silence_stop_ms;
        let mut samples = Vec::new();
        let mut heard_voice = false;
        let mut silent_ms = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep_until(deadline) => break,
                payload = self.audio.recv() => {
                    let Some(payload) = payload else { break };
                    let chunk = g711::decode(&payload);
                    let chunk_ms = pcm::duration_ms(chunk.len(), g711::SAMPLE_RATE);
                    if pcm::average_energy(&chunk) >= self.config.voice_energy_threshold {
                        heard_voice = true;
                        silent_ms = 0;
                    } else if heard_voice {
                        silent_ms += chunk_ms;
                    }
                    samples.extend_from_slice(&chunk);
                    if heard_voice && silent_ms >= silence_stop {
                        debug!("Silence after speech, recording stopped");
                        break;
                    }
                }
            }
        }
        Some(samples)
    }

    async fn listen_for_digits(&mut self) -> Result<SessionEnd> {
        let cancel = self.stream.lifetime().clone();
        let idle = self.config.dtmf_idle_timeout();
        let mut audio_open = true;

        loop {
            let idle_timer = tokio::time::sleep(idle);
            tokio::pin!(idle_timer);
            let digit = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                    _ = &mut idle_timer => {
                        info!(call_id = %self.stream.call_id(), "No digit for {:?}", idle);
                        return Ok(SessionEnd::IdleTimeout);
                    }
                    digit = self.digits.recv() => match digit {
                        Some(digit) => break digit,
                        None => return Ok(SessionEnd::DigitsClosed),
                    },
                    // Keep the inbound channel drained while listening
                    payload = self.audio.recv(), if audio_open => audio_open = payload.is_some(),
                }
            };

            debug!(call_id = %self.stream.call_id(), "Digit {}", digit);
            let Some(path) = self.config.digit_clip(digit).cloned() else {
                continue;
            };
            if let Some(clip) = load_clip(&path).await {
                if self.stream.send_ulaw(&clip).await? == SendOutcome::Cancelled {
                    return Ok(SessionEnd::Cancelled);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_util::sync::CancellationToken;
    use switchboard_rtp_core::MediaPortAllocator;

    struct Harness {
        session: MediaSession,
        audio: mpsc::Sender<Bytes>,
        digits: mpsc::Sender<char>,
        cancel: CancellationToken,
        _peer: switchboard_rtp_core::CallMediaSocket,
    }

    async fn harness(config: MediaConfig) -> Harness {
        let allocator = MediaPortAllocator::ephemeral(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let ours = allocator.allocate().await.unwrap();
        let peer = allocator.allocate().await.unwrap();
        let cancel = CancellationToken::new();
        let stream = MediaStream::new("m1".into(), ours, peer.local_addr(), cancel.clone());
        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (digit_tx, digit_rx) = mpsc::channel(4);
        let session = MediaSession::new(stream, audio_rx, digit_rx, config, Arc::new(CallRegistry::new()));
        Harness { session, audio: audio_tx, digits: digit_tx, cancel, _peer: peer }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = MediaConfig {
            record_max_ms: 100,
            recordings_dir: dir.path().to_path_buf(),
            ..MediaConfig::default()
        };
        let h = harness(config).await;
        let _keep = (h.audio, h.digits, h._peer);
        assert_eq!(h.session.run().await.unwrap(), SessionEnd::IdleTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_recording() {
        let h = harness(MediaConfig::default()).await;
        let _keep = (h.audio, h.digits, h._peer);
        let handle = tokio::spawn(h.session.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.cancel.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_silence_after_voice_stops_recording_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let config = MediaConfig {
            record_silence_stop_ms: 100,
            recordings_dir: dir.path().to_path_buf(),
            dtmf_idle_timeout_ms: 50,
            ..MediaConfig::default()
        };
        let h = harness(config).await;
        let (session, audio, digits, _peer) = (h.session, h.audio, h.digits, h._peer);
        let loud = g711::encode(&[8000i16; 160]);
        let quiet = g711::encode(&[0i16; 160]);
        audio.send(Bytes::from(loud)).await.unwrap();
        for _ in 0..5 {
            audio.send(Bytes::from(quiet.clone())).await.unwrap();
        }
        drop(digits);

        assert_eq!(session.run().await.unwrap(), SessionEnd::DigitsClosed);
        let saved = dir.path().join("m1.wav");
        let audio = switchboard_codec_core::read_wav(&saved).unwrap();
        assert_eq!(audio.samples.len(), 6 * 160);
    }
}
