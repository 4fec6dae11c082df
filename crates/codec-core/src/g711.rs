//! G.711 μ-law (PCMU) codec.
//!
//! One byte per sample at 8 kHz. The encoder uses the segment search from
//! ITU-T G.711 with the standard 0x84 bias; decoding is the exact inverse of
//! the segment/mantissa layout.

/// RTP static payload type for PCMU
pub const PAYLOAD_TYPE: u8 = 0;

/// Wire sample rate
pub const SAMPLE_RATE: u32 = 8000;

/// Samples in one 20 ms frame
pub const SAMPLES_PER_FRAME: usize = 160;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Encodes one linear sample to μ-law
pub fn encode_sample(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    value = value.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (value >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa) as u8
}

/// Decodes one μ-law byte to a linear sample
pub fn decode_sample(encoded: u8) -> i16 {
    let value = !encoded as i32;
    let sign = value & 0x80;
    let exponent = (value >> 4) & 0x07;
    let mantissa = value & 0x0F;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encodes a block of linear samples
pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().copied().map(encode_sample).collect()
}

/// Decodes a block of μ-law bytes
pub fn decode(encoded: &[u8]) -> Vec<i16> {
    encoded.iter().copied().map(decode_sample).collect()
}
