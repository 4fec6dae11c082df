//! Preparing a flushed buffer for the recognizer.

use tracing::trace;

use switchboard_codec_core::{g711, pcm, resample};

use crate::config::ConversationConfig;
use crate::error::Result;

/// What the pipeline made of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    /// Shorter than the minimum signal length
    TooShort { duration_ms: u64 },
    /// Average energy below the silence floor after gain
    Silent { energy: f64 },
    /// PCM at the recognizer's rate
    Ready { samples: Vec<i16>, gain: f32 },
}

/// decode → length check → bounded gain → resample → silence check
pub fn prepare_for_recognition(ulaw: &[u8], config: &ConversationConfig) -> Result<Prepared> {
    let mut samples = g711::decode(ulaw);
    let duration_ms = pcm::duration_ms(samples.len(), g711::SAMPLE_RATE);
    if duration_ms < config.min_signal_ms {
        return Ok(Prepared::TooShort { duration_ms });
    }

    let mut gain = 1.0;
    if pcm::peak_amplitude(&samples) < config.gain_peak_floor {
        gain = pcm::normalize(&mut samples, config.gain_target_peak, config.max_gain);
        trace!("Applied gain {:.2}", gain);
    }

    let samples = resample(&samples, g711::SAMPLE_RATE, config.recognizer_sample_rate)?;
    let energy = pcm::average_energy(&samples);
    if energy < config.silence_energy_floor {
        return Ok(Prepared::Silent { energy });
    }
    Ok(Prepared::Ready { samples, gain })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: i16, len: usize) -> Vec<u8> {
        let samples: Vec<i16> = (0..len).map(|i| if i % 2 == 0 { amplitude } else { -amplitude }).collect();
        g711::encode(&samples)
    }

    #[test]
    fn test_too_short() {
        let config = ConversationConfig::default();
        let prepared = prepare_for_recognition(&tone(5000, 400), &config).unwrap();
        assert_eq!(prepared, Prepared::TooShort { duration_ms: 50 });
    }

    #[test]
    fn test_silence_is_skipped() {
        let config = ConversationConfig::default();
        let prepared = prepare_for_recognition(&tone(0, 8000), &config).unwrap();
        assert!(matches!(prepared, Prepared::Silent { .. }));
    }

    #[test]
    fn test_quiet_speech_gain_is_capped() {
        let config = ConversationConfig::default();
        match prepare_for_recognition(&tone(1000, 8000), &config).unwrap() {
            Prepared::Ready { samples, gain } => {
                assert_eq!(gain, 4.0);
                assert_eq!(samples.len(), 16_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_loud_speech_is_untouched() {
        let config = ConversationConfig::default();
        match prepare_for_recognition(&tone(12_000, 8000), &config).unwrap() {
            Prepared::Ready { gain, .. } => assert_eq!(gain, 1.0),
            other => panic!("unexpected {other:?}"),
        }
    }
}
