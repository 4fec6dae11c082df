//! Splits encoded audio into 20 ms RTP packets for one outbound stream.

use bytes::Bytes;

use crate::packet::{RtpHeader, RtpPacket};
use crate::{RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// Default frame size: 160 samples is 20 ms at 8 kHz
pub const DEFAULT_SAMPLES_PER_FRAME: usize = 160;

/// Per-stream packetizer.
///
/// Sequence number and timestamp carry over between calls to [`packetize`],
/// so consecutive utterances in one call form a single continuous stream.
/// The last packet of each `packetize` call carries the marker bit.
///
/// [`packetize`]: RtpPacketizer::packetize
#[derive(Debug, Clone)]
pub struct RtpPacketizer {
    payload_type: u8,
    ssrc: RtpSsrc,
    sequence_number: RtpSequenceNumber,
    timestamp: RtpTimestamp,
    samples_per_frame: usize,
}

impl RtpPacketizer {
    /// Packetizer with random SSRC, sequence number and timestamp origin
    pub fn new(payload_type: u8) -> Self {
        Self::with_state(payload_type, rand::random(), rand::random(), rand::random())
    }

    pub fn with_state(
        payload_type: u8,
        ssrc: RtpSsrc,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
    ) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence_number,
            timestamp,
            samples_per_frame: DEFAULT_SAMPLES_PER_FRAME,
        }
    }

    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence_number(&self) -> RtpSequenceNumber {
        self.sequence_number
    }

    /// Timestamp the next packet will carry
    pub fn next_timestamp(&self) -> RtpTimestamp {
        self.timestamp
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// Splits one-byte-per-sample audio into frames.
    ///
    /// Yields `ceil(len / samples_per_frame)` packets; the final one may be short.
    pub fn packetize(&mut self, encoded: &[u8]) -> Vec<RtpPacket> {
        let frame_count = encoded.len().div_ceil(self.samples_per_frame);
        let mut packets = Vec::with_capacity(frame_count);

        for (index, frame) in encoded.chunks(self.samples_per_frame).enumerate() {
            let mut header =
                RtpHeader::new(self.payload_type, self.sequence_number, self.timestamp, self.ssrc);
            header.marker = index + 1 == frame_count;
            packets.push(RtpPacket::new(header, Bytes::copy_from_slice(frame)));

            self.sequence_number = self.sequence_number.wrapping_add(1);
            self.timestamp = self.timestamp.wrapping_add(self.samples_per_frame as u32);
        }

        packets
    }
}
