//! Linear-interpolation sample-rate conversion for mono 16-bit PCM.
//!
//! Good enough for speech between 8 kHz telephony audio and the 16/24 kHz
//! rates speech services use; no anti-aliasing filter is applied.

use crate::error::{CodecError, Result};

/// Resamples `samples` from `from_rate` to `to_rate`
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    if from_rate == 0 {
        return Err(CodecError::InvalidSampleRate { rate: from_rate });
    }
    if to_rate == 0 {
        return Err(CodecError::InvalidSampleRate { rate: to_rate });
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let position = i as f64 * step;
        let index = position.floor() as usize;
        let frac = position - index as f64;
        let a = samples[index.min(last)] as f64;
        let b = samples[(index + 1).min(last)] as f64;
        output.push((a + (b - a) * frac).round() as i16);
    }
    Ok(output)
}
