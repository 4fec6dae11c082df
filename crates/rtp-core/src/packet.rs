use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// RTP protocol version (always 2 in practice)
pub const RTP_VERSION: u8 = 2;

/// Minimum header size (without CSRC or extensions)
pub const RTP_MIN_HEADER_SIZE: usize = 12;

/// RTP fixed header according to RFC 3550 §5.1
///
/// CSRC entries and header extensions are skipped on parse and never written;
/// the switchboard only exchanges single-source audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (should be 2)
    pub version: u8,

    /// Padding flag
    pub padding: bool,

    /// Extension flag
    pub extension: bool,

    /// CSRC count (number of contributing sources)
    pub cc: u8,

    /// Marker bit
    pub marker: bool,

    /// Payload type
    pub payload_type: u8,

    pub sequence_number: RtpSequenceNumber,

    pub timestamp: RtpTimestamp,

    /// Synchronization source identifier
    pub ssrc: RtpSsrc,
}

impl RtpHeader {
    /// Create a new RTP header with default values
    pub fn new(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            cc: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    /// Parse an RTP header, consuming CSRCs and any extension block
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        // Version (2 bits), padding (1 bit), extension (1 bit), CSRC count (4 bits)
        let first_byte = buf.get_u8();
        let version = first_byte >> 6;
        if version != RTP_VERSION {
            return Err(Error::InvalidPacket(format!("Invalid RTP version: {}", version)));
        }
        let padding = first_byte & 0x20 != 0;
        let extension = first_byte & 0x10 != 0;
        let cc = first_byte & 0x0F;

        // Marker (1 bit), payload type (7 bits)
        let second_byte = buf.get_u8();
        let marker = second_byte & 0x80 != 0;
        let payload_type = second_byte & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let csrc_len = cc as usize * 4;
        if buf.remaining() < csrc_len {
            return Err(Error::BufferTooSmall { required: csrc_len, available: buf.remaining() });
        }
        buf.advance(csrc_len);

        if extension {
            if buf.remaining() < 4 {
                return Err(Error::BufferTooSmall { required: 4, available: buf.remaining() });
            }
            let _profile = buf.get_u16();
            // Length in 32-bit words
            let ext_length = buf.get_u16() as usize * 4;
            if buf.remaining() < ext_length {
                return Err(Error::BufferTooSmall { required: ext_length, available: buf.remaining() });
            }
            buf.advance(ext_length);
        }

        Ok(Self {
            version,
            padding,
            extension,
            cc,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
        })
    }

    /// Serialize the fixed header (CSRC/extension flags are cleared)
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.reserve(RTP_MIN_HEADER_SIZE);
        let mut first_byte = (self.version & 0x03) << 6;
        if self.padding {
            first_byte |= 0x20;
        }
        buf.put_u8(first_byte);

        let mut second_byte = self.payload_type & 0x7F;
        if self.marker {
            second_byte |= 0x80;
        }
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }
}

/// RTP packet: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parse an RTP packet, stripping any padding
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let header = RtpHeader::parse(&mut buf)?;

        let mut payload_len = buf.len();
        if header.padding {
            let pad = *buf.last().ok_or_else(|| Error::InvalidPacket("padding flag without payload".into()))? as usize;
            if pad == 0 || pad > payload_len {
                return Err(Error::InvalidPacket(format!("invalid padding length {}", pad)));
            }
            payload_len -= pad;
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }

    /// Serialize the packet into a fresh buffer
    pub fn serialize(&self) -> Bytes {
        let mut header = self.header.clone();
        header.padding = false;
        let mut buf = BytesMut::with_capacity(RTP_MIN_HEADER_SIZE + self.payload.len());
        header.serialize(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn size(&self) -> usize {
        RTP_MIN_HEADER_SIZE + self.payload.len()
    }
}

impl fmt::Display for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RTP[PT={}, SEQ={}, TS={}, SSRC={:08x}, M={}, {} bytes]",
            self.header.payload_type,
            self.header.sequence_number,
            self.header.timestamp,
            self.header.ssrc,
            self.header.marker,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_layout() {
        let mut header = RtpHeader::new(0, 0x1234, 0xDEADBEEF, 0x01020304);
        header.marker = true;
        let packet = RtpPacket::new(header, Bytes::from_static(&[0xFF; 4]));
        let wire = packet.serialize();

        assert_eq!(wire[0], 0x80);
        assert_eq!(wire[1], 0x80);
        assert_eq!(&wire[2..4], &[0x12, 0x34]);
        assert_eq!(&wire[4..8], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&wire[8..12], &[1, 2, 3, 4]);
        assert_eq!(wire.len(), 16);

        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_parse_skips_csrc_extension_and_padding() {
        let mut data = vec![
            0x80 | 0x20 | 0x10 | 0x01, // V=2, P, X, CC=1
            101,
            0, 7,
            0, 0, 0, 160,
            0, 0, 0, 9,
            0xAA, 0xAA, 0xAA, 0xAA, // CSRC
            0xBE, 0xDE, 0, 1, // extension header, one word
            1, 2, 3, 4,
        ];
        data.extend_from_slice(&[5, 0x0A, 0, 160]);
        data.extend_from_slice(&[0, 0, 3]); // padding, last byte = count

        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(packet.header.payload_type, 101);
        assert_eq!(packet.header.sequence_number, 7);
        assert_eq!(&packet.payload[..], &[5, 0x0A, 0, 160]);
    }

    #[test]
    fn test_reject_invalid() {
        assert!(matches!(RtpPacket::parse(&[0x80, 0]), Err(Error::BufferTooSmall { .. })));
        let mut v1 = vec![0x40, 0];
        v1.extend_from_slice(&[0; 10]);
        assert!(matches!(RtpPacket::parse(&v1), Err(Error::InvalidPacket(_))));
    }
}
