//! WAV container read/write (via `hound`).

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::error::{CodecError, Result};

/// Decoded WAV audio: mono 16-bit samples and their rate
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Writes mono 16-bit samples to a WAV file
pub fn write_wav(path: impl AsRef<Path>, sample_rate: u32, samples: &[i16]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = WavWriter::create(path, mono_spec(sample_rate))?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    debug!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Encodes mono 16-bit samples as an in-memory WAV file
pub fn encode_wav(sample_rate: u32, samples: &[i16]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, mono_spec(sample_rate))?;
        for sample in samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Reads a 16-bit integer WAV file; multi-channel input is downmixed to mono
pub fn read_wav(path: impl AsRef<Path>) -> Result<WavAudio> {
    let reader = WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(CodecError::invalid_format(format!(
            "{}: expected 16-bit integer PCM, found {} bit {:?}",
            path.as_ref().display(),
            spec.bits_per_sample,
            spec.sample_format
        )));
    }
    let channels = spec.channels.max(1) as usize;
    let interleaved = reader.into_samples::<i16>().collect::<std::result::Result<Vec<_>, _>>()?;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| (frame.iter().map(|s| *s as i32).sum::<i32>() / frame.len() as i32) as i16)
            .collect()
    };
    Ok(WavAudio { sample_rate: spec.sample_rate, samples })
}
