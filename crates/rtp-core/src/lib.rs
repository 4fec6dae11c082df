//! # switchboard-rtp-core
//!
//! RTP for single-stream narrowband audio:
//!
//! - [`packet`]: RFC 3550 fixed header parse/serialize
//! - [`packetizer`]: 20 ms framing with sequence/timestamp continuity
//! - [`dtmf`]: RFC 2833 telephone-event decoding
//! - [`socket`]: per-call sockets allocated from a port range

pub mod dtmf;
pub mod error;
pub mod packet;
pub mod packetizer;
pub mod socket;

pub use dtmf::{TelephoneEvent, TelephoneEventDetector};
pub use error::Error;
pub use packet::{RtpHeader, RtpPacket};
pub use packetizer::RtpPacketizer;
pub use socket::{CallMediaSocket, MediaPortAllocator};

/// Result type for RTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// RTP sequence number
pub type RtpSequenceNumber = u16;

/// RTP timestamp
pub type RtpTimestamp = u32;

/// RTP synchronization source identifier
pub type RtpSsrc = u32;
