//! Utterance buffering and the decision of when to run recognition.

use switchboard_codec_core::{g711, pcm};

use crate::config::ConversationConfig;

/// μ-law bytes per millisecond at 8 kHz
const BYTES_PER_MS: usize = (g711::SAMPLE_RATE / 1000) as usize;

/// Thresholds deciding when a buffer goes to recognition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferPolicy {
    pub fast_ms: u64,
    pub ceiling_ms: u64,
    pub min_ms: u64,
    pub silent_chunks: u32,
    pub voice_threshold: f64,
}

impl From<&ConversationConfig> for BufferPolicy {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            fast_ms: config.fast_threshold_ms,
            ceiling_ms: config.hard_ceiling_ms,
            min_ms: config.min_buffer_ms,
            silent_chunks: config.silent_chunks,
            voice_threshold: config.voice_energy_threshold,
        }
    }
}

/// Which trigger fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Fast threshold reached after voice was heard
    Fast,
    /// Hard ceiling reached, voice or not
    Ceiling,
    /// Minimum length reached and the caller went quiet
    Silence,
}

/// Rolling μ-law buffer with voice-activity counters
#[derive(Debug, Clone)]
pub struct UtteranceBuffer {
    policy: BufferPolicy,
    audio: Vec<u8>,
    heard_voice: bool,
    silent_run: u32,
}

impl UtteranceBuffer {
    pub fn new(policy: BufferPolicy) -> Self {
        Self { policy, audio: Vec::new(), heard_voice: false, silent_run: 0 }
    }

    /// Appends one inbound payload and updates voice activity
    pub fn push(&mut self, payload: &[u8]) {
        let energy = pcm::average_energy(&g711::decode(payload));
        if energy >= self.policy.voice_threshold {
            self.heard_voice = true;
            self.silent_run = 0;
        } else {
            self.silent_run = self.silent_run.saturating_add(1);
        }
        self.audio.extend_from_slice(payload);
    }

    pub fn duration_ms(&self) -> u64 {
        (self.audio.len() / BYTES_PER_MS) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }

    pub fn heard_voice(&self) -> bool {
        self.heard_voice
    }

    /// First trigger that currently holds, if any
    pub fn flush_reason(&self) -> Option<FlushReason> {
        let duration = self.duration_ms();
        if duration >= self.policy.ceiling_ms {
            Some(FlushReason::Ceiling)
        } else if duration >= self.policy.fast_ms && self.heard_voice {
            Some(FlushReason::Fast)
        } else if duration >= self.policy.min_ms && self.silent_run >= self.policy.silent_chunks {
            Some(FlushReason::Silence)
        } else {
            None
        }
    }

    /// Takes the buffered audio and resets the counters
    pub fn take(&mut self) -> Vec<u8> {
        self.heard_voice = false;
        self.silent_run = 0;
        std::mem::take(&mut self.audio)
    }

    /// Drops the oldest audio beyond the hard ceiling.
    ///
    /// Used while a previous buffer is still being recognized, so the next one
    /// never exceeds what the recognizer accepts.
    pub fn trim_to_ceiling(&mut self) {
        let max_len = self.policy.ceiling_ms as usize * BYTES_PER_MS;
        if self.audio.len() > max_len {
            let excess = self.audio.len() - max_len;
            self.audio.drain(..excess);
        }
    }

    /// Discards everything (message phase)
    pub fn clear(&mut self) {
        self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BufferPolicy {
        BufferPolicy::from(&ConversationConfig::default())
    }

    fn loud() -> Vec<u8> {
        g711::encode(&[6000i16; 160])
    }

    fn quiet() -> Vec<u8> {
        g711::encode(&[0i16; 160])
    }

    #[test]
    fn test_fast_threshold_with_voice() {
        let mut buffer = UtteranceBuffer::new(policy());
        for _ in 0..74 {
            buffer.push(&loud());
            assert_eq!(buffer.flush_reason(), None);
        }
        buffer.push(&loud());
        assert_eq!(buffer.duration_ms(), 1500);
        assert_eq!(buffer.flush_reason(), Some(FlushReason::Fast));
        assert_eq!(buffer.take().len(), 75 * 160);
        assert_eq!(buffer.flush_reason(), None);
    }

    #[test]
    fn test_silence_after_minimum_length() {
        let mut buffer = UtteranceBuffer::new(policy());
        buffer.push(&loud());
        for _ in 0..39 {
            buffer.push(&quiet());
        }
        assert_eq!(buffer.flush_reason(), None);
        buffer.push(&quiet());
        assert_eq!(buffer.flush_reason(), Some(FlushReason::Silence));
    }

    #[test]
    fn test_short_voiced_buffer_never_triggers() {
        let mut buffer = UtteranceBuffer::new(policy());
        for _ in 0..20 {
            buffer.push(&loud());
        }
        assert_eq!(buffer.flush_reason(), None);
    }

    #[test]
    fn test_ceiling_regardless_of_voice() {
        let mut buffer = UtteranceBuffer::new(BufferPolicy { silent_chunks: u32::MAX, ..policy() });
        for _ in 0..125 {
            buffer.push(&quiet());
        }
        assert_eq!(buffer.flush_reason(), Some(FlushReason::Ceiling));
    }

    #[test]
    fn test_trim_keeps_newest_audio() {
        let mut buffer = UtteranceBuffer::new(policy());
        for _ in 0..130 {
            buffer.push(&loud());
        }
        buffer.push(&[0x00; 160]);
        buffer.trim_to_ceiling();
        assert_eq!(buffer.duration_ms(), 2500);
        assert_eq!(buffer.take().last(), Some(&0x00));
    }
}
