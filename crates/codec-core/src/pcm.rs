//! Helpers for little-endian 16-bit mono PCM.

/// Interprets little-endian bytes as samples; a trailing odd byte is ignored
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Largest absolute sample value
pub fn peak_amplitude(samples: &[i16]) -> u16 {
    samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
}

/// Mean absolute amplitude, used as a cheap energy estimate
pub fn average_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let total: u64 = samples.iter().map(|s| s.unsigned_abs() as u64).sum();
    total as f64 / samples.len() as f64
}

/// Scales samples so the peak approaches `target_peak`, never by more than `max_gain`.
///
/// Returns the gain that was applied (1.0 when the input is silent or already loud enough).
pub fn normalize(samples: &mut [i16], target_peak: u16, max_gain: f32) -> f32 {
    let peak = peak_amplitude(samples);
    if peak == 0 || peak >= target_peak {
        return 1.0;
    }
    let gain = (target_peak as f32 / peak as f32).min(max_gain).max(1.0);
    for sample in samples.iter_mut() {
        *sample = (*sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
    gain
}

/// Duration in milliseconds of `samples` at `sample_rate`
pub fn duration_ms(samples: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples as u64 * 1000 / sample_rate as u64
}
