//! Prerecorded clips, loaded from WAV and converted to the wire codec.

use std::path::Path;

use tracing::{debug, warn};

use switchboard_codec_core::{g711, pcm_to_ulaw, read_wav};

/// Loads a clip as μ-law at 8 kHz.
///
/// A missing or unreadable file yields `None`; callers skip the step.
pub async fn load_clip(path: &Path) -> Option<Vec<u8>> {
    let owned = path.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || read_wav(&owned)).await;
    let audio = match loaded {
        Ok(Ok(audio)) => audio,
        Ok(Err(e)) => {
            warn!("Skipping clip {}: {}", path.display(), e);
            return None;
        }
        Err(e) => {
            warn!("Clip loader for {} failed: {}", path.display(), e);
            return None;
        }
    };
    match pcm_to_ulaw(&audio.samples, audio.sample_rate) {
        Ok(encoded) => {
            debug!(
                "Loaded clip {} ({} ms)",
                path.display(),
                encoded.len() as u64 * 1000 / u64::from(g711::SAMPLE_RATE)
            );
            Some(encoded)
        }
        Err(e) => {
            warn!("Skipping clip {}: {}", path.display(), e);
            None
        }
    }
}

/// Like [`load_clip`], for an optional path
pub async fn load_optional_clip(path: Option<&Path>) -> Option<Vec<u8>> {
    match path {
        Some(path) => load_clip(path).await,
        None => None,
    }
}
