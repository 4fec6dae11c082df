//! Per-call conversational loop for automated calls.
//!
//! The main loop owns the utterance buffer and the turn state. Recognition and
//! reply selection run in one task per flushed buffer, speaking runs in its own
//! task; both report back over an internal channel, so the loop never blocks on
//! a speech service and keeps draining inbound audio.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use switchboard_codec_core::g711;
use switchboard_infra_common::call_span;

use crate::config::ConversationConfig;
use crate::conversation::buffer::{BufferPolicy, UtteranceBuffer};
use crate::conversation::pipeline::{prepare_for_recognition, Prepared};
use crate::conversation::reply::{select_reply, Reply};
use crate::error::{CallEngineError, Result};
use crate::media::recorder::{save_recording, SharedRecorder};
use crate::media::stream::{MediaStream, SendOutcome};
use crate::policy::AutomationProfile;
use crate::registry::CallRegistry;
use crate::speech::{recognize, SpeechServices};
use crate::types::CallId;

/// Why the conversation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEnd {
    /// The call's lifetime was cancelled
    Cancelled,
    /// The message window elapsed; the call should be hung up
    MessageWindowElapsed,
    /// Turn limit reached without recording; the call should be hung up
    TurnLimitReached,
    /// The media receiver went away
    AudioClosed,
}

impl ConversationEnd {
    pub fn requires_hangup(self) -> bool {
        !matches!(self, ConversationEnd::Cancelled)
    }
}

/// What happens once a reply has been spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterSpeech {
    /// Opening line; holds no processing slot
    Opening,
    Continue,
    EnterMessagePhase,
    EndCall,
}

#[derive(Debug)]
enum Event {
    Replied(Option<Reply>),
    Spoke(AfterSpeech),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Conversing,
    Message,
    Ending,
}

// Everything the spawned tasks need
struct Shared {
    call_id: CallId,
    stream: Arc<MediaStream>,
    services: SpeechServices,
    config: ConversationConfig,
    profile: Arc<AutomationProfile>,
    recorder: Option<SharedRecorder>,
}

pub struct Orchestrator {
    shared: Arc<Shared>,
    audio: mpsc::Receiver<Bytes>,
    registry: Arc<CallRegistry>,
    recording_path: Option<PathBuf>,
}

impl Orchestrator {
    /// `recording_path` is used only when the profile enables recording
    pub fn new(
        stream: Arc<MediaStream>,
        audio: mpsc::Receiver<Bytes>,
        profile: Arc<AutomationProfile>,
        services: SpeechServices,
        config: ConversationConfig,
        recording_path: PathBuf,
        registry: Arc<CallRegistry>,
    ) -> Self {
        let recorder = profile.recording.then(SharedRecorder::default);
        let recording_path = profile.recording.then_some(recording_path);
        Self {
            shared: Arc::new(Shared {
                call_id: stream.call_id().clone(),
                stream,
                services,
                config,
                profile,
                recorder,
            }),
            audio,
            registry,
            recording_path,
        }
    }

    pub async fn run(mut self) -> ConversationEnd {
        let call_id = self.shared.call_id.clone();
        info!(call_id = %call_id, recording = self.recording_path.is_some(), "Conversation started");
        if let Some(path) = &self.recording_path {
            self.registry.set_recording_path(&call_id, path.clone());
        }

        let end = self.converse().await;
        info!(call_id = %call_id, "Conversation finished: {:?}", end);

        if let (Some(recorder), Some(path)) = (&self.shared.recorder, self.recording_path.take()) {
            let samples = std::mem::take(&mut *recorder.lock()).into_samples();
            if !samples.is_empty() {
                match save_recording(path, samples).await {
                    Ok(path) => info!(call_id = %call_id, "Recording saved to {}", path.display()),
                    Err(e) => warn!(call_id = %call_id, "Failed to save recording: {}", e),
                }
            }
        }
        end
    }

    async fn converse(&mut self) -> ConversationEnd {
        let shared = self.shared.clone();
        let cancel = shared.stream.lifetime().clone();
        let config = &shared.config;
        let (events_tx, mut events) = mpsc::channel::<Event>(8);

        if let Some(line) = shared.profile.opening_line.clone() {
            spawn_speech(&shared, line, AfterSpeech::Opening, events_tx.clone());
        }

        let mut buffer = UtteranceBuffer::new(BufferPolicy::from(config));
        let mut phase = Phase::Conversing;
        let mut processing = false;
        let mut turns = 0u32;
        let mut deadline: Option<Instant> = None;

        let mut flush_timer = tokio::time::interval(config.flush_interval());
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let mut evaluate = false;
            tokio::select! {
                _ = cancel.cancelled() => return ConversationEnd::Cancelled,

                _ = sleep_until_opt(deadline) => {
                    return match phase {
                        Phase::Message => ConversationEnd::MessageWindowElapsed,
                        _ => ConversationEnd::TurnLimitReached,
                    };
                }

                payload = self.audio.recv() => {
                    let Some(payload) = payload else {
                        return ConversationEnd::AudioClosed;
                    };
                    if let Some(recorder) = &shared.recorder {
                        recorder.lock().append_inbound(&g711::decode(&payload));
                    }
                    if phase == Phase::Conversing {
                        buffer.push(&payload);
                        evaluate = true;
                    }
                }

                _ = flush_timer.tick() => evaluate = phase == Phase::Conversing,

                Some(event) = events.recv() => match event {
                    Event::Replied(None) => {
                        processing = false;
                        evaluate = phase == Phase::Conversing;
                    }
                    Event::Replied(Some(reply)) => {
                        turns += 1;
                        let after = if turns >= config.max_turns {
                            if shared.profile.recording {
                                AfterSpeech::EnterMessagePhase
                            } else {
                                AfterSpeech::EndCall
                            }
                        } else {
                            AfterSpeech::Continue
                        };
                        info!(call_id = %shared.call_id, turn = turns, source = ?reply.source, "Replying: {}", reply.text);
                        let text = if after == AfterSpeech::EnterMessagePhase {
                            format!("{} {}", reply.text, config.notice_text())
                        } else {
                            reply.text
                        };
                        if after != AfterSpeech::Continue {
                            phase = Phase::Ending;
                            buffer.clear();
                        }
                        spawn_speech(&shared, text, after, events_tx.clone());
                    }
                    Event::Spoke(after) => match after {
                        AfterSpeech::Opening => debug!(call_id = %shared.call_id, "Opening line spoken"),
                        AfterSpeech::Continue => {
                            processing = false;
                            evaluate = phase == Phase::Conversing;
                        }
                        AfterSpeech::EnterMessagePhase => {
                            info!(call_id = %shared.call_id, "Entering message phase for {:?}", config.message_window());
                            phase = Phase::Message;
                            deadline = Some(Instant::now() + config.message_window());
                        }
                        AfterSpeech::EndCall => {
                            debug!(call_id = %shared.call_id, "Turn limit reached, ending call");
                            deadline = Some(Instant::now() + config.end_call_grace());
                        }
                    },
                },
            }

            if !evaluate || phase != Phase::Conversing {
                continue;
            }
            if processing {
                buffer.trim_to_ceiling();
                continue;
            }
            if let Some(reason) = buffer.flush_reason() {
                debug!(call_id = %shared.call_id, "Flushing {} ms ({:?})", buffer.duration_ms(), reason);
                processing = true;
                spawn_processing(&shared, buffer.take(), turns, events_tx.clone());
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn spawn_processing(shared: &Arc<Shared>, ulaw: Vec<u8>, turn: u32, events: mpsc::Sender<Event>) {
    let shared = shared.clone();
    let span = call_span("conversation", shared.call_id.as_str());
    tokio::spawn(
        async move {
            let reply = process_buffer(&shared, ulaw, turn).await;
            // The loop is gone when the call ended meanwhile
            let _ = events.send(Event::Replied(reply)).await;
        }
        .instrument(span),
    );
}

fn spawn_speech(shared: &Arc<Shared>, text: String, after: AfterSpeech, events: mpsc::Sender<Event>) {
    let shared = shared.clone();
    let span = call_span("conversation", shared.call_id.as_str());
    tokio::spawn(
        async move {
            match speak(&shared, &text).await {
                Ok(SendOutcome::Cancelled) => return,
                Ok(SendOutcome::Completed) => {}
                Err(e) => warn!("Failed to speak reply: {}", e),
            }
            let _ = events.send(Event::Spoke(after)).await;
        }
        .instrument(span),
    );
}

async fn process_buffer(shared: &Shared, ulaw: Vec<u8>, turn: u32) -> Option<Reply> {
    let config = &shared.config;
    let samples = match prepare_for_recognition(&ulaw, config) {
        Ok(Prepared::Ready { samples, .. }) => samples,
        Ok(Prepared::TooShort { duration_ms }) => {
            debug!("Skipping {} ms buffer", duration_ms);
            return None;
        }
        Ok(Prepared::Silent { energy }) => {
            debug!("Skipping silent buffer (energy {:.1})", energy);
            return None;
        }
        Err(e) => {
            warn!("Could not prepare audio for recognition: {}", e);
            return None;
        }
    };

    let correlation_id = format!("{}-{}", shared.call_id, turn + 1);
    let text = match recognize(
        shared.services.recognizer.as_ref(),
        &correlation_id,
        &samples,
        config.recognizer_timeout(),
        shared.stream.lifetime(),
    )
    .await
    {
        Ok(Some(text)) => text,
        Ok(None) => {
            debug!("Nothing recognized");
            return None;
        }
        Err(e) => {
            warn!("Recognition failed: {}", e);
            return None;
        }
    };
    info!("Caller said: {}", text);

    select_reply(&shared.profile, &text, shared.services.responder.as_deref(), config.service_timeout()).await
}

/// Synthesizes `text`, adds it to the recording and streams it
async fn speak(shared: &Shared, text: &str) -> Result<SendOutcome> {
    let cancel = shared.stream.lifetime();
    let timeout = shared.config.service_timeout();
    let synthesized = tokio::select! {
        _ = cancel.cancelled() => return Ok(SendOutcome::Cancelled),
        result = tokio::time::timeout(timeout, shared.services.synthesizer.synthesize(text)) => result,
    };
    let audio = synthesized
        .map_err(|_| CallEngineError::Timeout(format!("synthesis exceeded {timeout:?}")))??;

    let format = shared.services.synthesizer.format();
    let samples = format.decode_pcm(&audio)?;
    if let Some(recorder) = &shared.recorder {
        recorder.lock().mix_outbound_at_rate(&samples, format.sample_rate)?;
    }
    shared.stream.send_pcm(&samples, format.sample_rate).await
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("call_id", &self.shared.call_id)
            .field("recording_path", &self.recording_path)
            .finish()
    }
}
