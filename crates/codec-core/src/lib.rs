//! # switchboard-codec-core
//!
//! Audio plumbing between the 8 kHz μ-law wire format and the linear PCM that
//! speech services consume and produce:
//!
//! - [`g711`]: PCMU encode/decode
//! - [`resample`]: rate conversion
//! - [`pcm`]: byte/sample conversion, level measurement and bounded gain
//! - [`wav`]: recording and clip files

pub mod error;
pub mod g711;
pub mod pcm;
pub mod resample;
pub mod wav;

pub use error::{CodecError, Result};
pub use resample::resample;
pub use wav::{read_wav, write_wav, WavAudio};

/// Decodes μ-law bytes and resamples them to `to_rate`
pub fn ulaw_to_pcm(encoded: &[u8], to_rate: u32) -> Result<Vec<i16>> {
    resample(&g711::decode(encoded), g711::SAMPLE_RATE, to_rate)
}

/// Resamples linear PCM at `from_rate` to 8 kHz and encodes it as μ-law
pub fn pcm_to_ulaw(samples: &[i16], from_rate: u32) -> Result<Vec<u8>> {
    Ok(g711::encode(&resample(samples, from_rate, g711::SAMPLE_RATE)?))
}
