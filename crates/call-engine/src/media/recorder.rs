//! Call recording: one mono track at 8 kHz holding both directions.
//!
//! Inbound audio advances the write cursor; outbound audio is mixed in at the
//! cursor, so what we said lands where the caller was when we said it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_codec_core::{g711, resample, write_wav};

use crate::error::{CallEngineError, Result};
use crate::types::CallId;

/// Where a call's recording is written
pub fn recording_path(dir: &Path, call_id: &CallId) -> PathBuf {
    dir.join(format!("{}.wav", call_id.file_stem()))
}

#[derive(Debug, Default)]
pub struct CallRecorder {
    samples: Vec<i16>,
    cursor: usize,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_inbound(&mut self, samples: &[i16]) {
        self.mix_at(self.cursor, samples);
        self.cursor += samples.len();
    }

    /// Decodes and appends one inbound μ-law payload
    pub fn append_inbound_ulaw(&mut self, payload: &[u8]) {
        self.append_inbound(&g711::decode(payload));
    }

    /// Mixes outbound audio (already at 8 kHz) in at the inbound cursor
    pub fn mix_outbound(&mut self, samples: &[i16]) {
        self.mix_at(self.cursor, samples);
    }

    /// Mixes outbound audio at its native rate
    pub fn mix_outbound_at_rate(&mut self, samples: &[i16], sample_rate: u32) -> Result<()> {
        let resampled = resample(samples, sample_rate, g711::SAMPLE_RATE)?;
        self.mix_outbound(&resampled);
        Ok(())
    }

    fn mix_at(&mut self, offset: usize, samples: &[i16]) {
        let end = offset + samples.len();
        if self.samples.len() < end {
            self.samples.resize(end, 0);
        }
        for (slot, &sample) in self.samples[offset..end].iter_mut().zip(samples) {
            *slot = slot.saturating_add(sample);
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / u64::from(g711::SAMPLE_RATE)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Recorder shared between the tasks of one call
pub type SharedRecorder = Arc<Mutex<CallRecorder>>;

/// Writes a WAV file off the runtime threads
pub async fn save_recording(path: PathBuf, samples: Vec<i16>) -> Result<PathBuf> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_wav(&target, g711::SAMPLE_RATE, &samples))
        .await
        .map_err(|e| CallEngineError::Internal(format!("recording writer failed: {e}")))??;
    Ok(path)
}

/// Drains inbound audio into a recording until the call ends, then saves it.
///
/// Used for answered outbound calls, where recording runs independently of
/// anything played to the peer.
pub async fn record_until_cancelled(
    call_id: CallId,
    mut audio: mpsc::Receiver<Bytes>,
    recorder: SharedRecorder,
    path: PathBuf,
    cancel: CancellationToken,
) -> Option<PathBuf> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            payload = audio.recv() => match payload {
                Some(payload) => recorder.lock().append_inbound_ulaw(&payload),
                None => break,
            },
        }
    }
    let samples = recorder.lock().samples().to_vec();
    if samples.is_empty() {
        debug!(call_id = %call_id, "Nothing recorded");
        return None;
    }
    match save_recording(path, samples).await {
        Ok(path) => {
            info!(call_id = %call_id, "Recording saved to {}", path.display());
            Some(path)
        }
        Err(e) => {
            warn!(call_id = %call_id, "Failed to save recording: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_outbound_mixes_at_inbound_cursor() {
        let mut recorder = CallRecorder::new();
        recorder.append_inbound(&[10, 10]);
        recorder.mix_outbound(&[5, 5, 5]);
        assert_eq!(recorder.samples(), &[10, 10, 5, 5, 5]);

        recorder.append_inbound(&[1, 1, 1, 1]);
        assert_eq!(recorder.samples(), &[10, 10, 6, 6, 6, 1]);
    }

    #[test]
    fn test_mix_saturates() {
        let mut recorder = CallRecorder::new();
        recorder.mix_outbound(&[i16::MAX]);
        recorder.append_inbound(&[100]);
        assert_eq!(recorder.samples(), &[i16::MAX]);
    }

    #[test]
    fn test_recording_path_uses_file_stem() {
        let path = recording_path(Path::new("/rec"), &CallId::from("abc@10.0.0.1"));
        assert_eq!(path, PathBuf::from("/rec/abc_10.0.0.1.wav"));
    }

    #[tokio::test]
    async fn test_record_until_cancelled_saves_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let recorder = SharedRecorder::default();

        tx.send(Bytes::from_static(&[0xFF; 160])).await.unwrap();
        tx.send(Bytes::from_static(&[0xFF; 160])).await.unwrap();
        drop(tx);

        let saved = record_until_cancelled("r1".into(), rx, recorder, path.clone(), cancel).await;
        assert_eq!(saved, Some(path.clone()));
        let audio = switchboard_codec_core::read_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.samples.len(), 320);
    }
}
