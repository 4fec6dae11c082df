//! RFC 2833 / RFC 4733 telephone-event payloads.

use crate::error::Error;
use crate::Result;

/// Size of one telephone-event payload
pub const TELEPHONE_EVENT_SIZE: usize = 4;

/// A decoded telephone-event payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephoneEvent {
    pub event: u8,
    pub end: bool,
    pub volume: u8,
    pub duration: u16,
}

impl TelephoneEvent {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < TELEPHONE_EVENT_SIZE {
            return Err(Error::BufferTooSmall {
                required: TELEPHONE_EVENT_SIZE,
                available: payload.len(),
            });
        }
        Ok(Self {
            event: payload[0],
            end: payload[1] & 0x80 != 0,
            volume: payload[1] & 0x3F,
            duration: u16::from_be_bytes([payload[2], payload[3]]),
        })
    }

    /// Keypad character for DTMF events 0-15
    pub fn digit(&self) -> Option<char> {
        event_to_digit(self.event)
    }
}

pub fn event_to_digit(event: u8) -> Option<char> {
    match event {
        0..=9 => char::from_digit(event as u32, 10),
        10 => Some('*'),
        11 => Some('#'),
        12..=15 => Some((b'A' + event - 12) as char),
        _ => None,
    }
}

/// Collapses the repeated packets of one key press into a single digit.
///
/// Senders repeat each event several times and send the end packet up to
/// three times; only the first end packet per RTP timestamp is reported.
#[derive(Debug, Default)]
pub struct TelephoneEventDetector {
    last_reported: Option<u32>,
}

impl TelephoneEventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_packet(&mut self, timestamp: u32, payload: &[u8]) -> Option<char> {
        let event = TelephoneEvent::parse(payload).ok()?;
        if !event.end || self.last_reported == Some(timestamp) {
            return None;
        }
        self.last_reported = Some(timestamp);
        event.digit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_mapping() {
        assert_eq!(event_to_digit(5), Some('5'));
        assert_eq!(event_to_digit(10), Some('*'));
        assert_eq!(event_to_digit(11), Some('#'));
        assert_eq!(event_to_digit(15), Some('D'));
        assert_eq!(event_to_digit(16), None);
    }

    #[test]
    fn test_detector_reports_once_per_press() {
        let mut detector = TelephoneEventDetector::new();
        let start = [3, 0x0A, 0, 160];
        let end = [3, 0x8A, 3, 32];
        assert_eq!(detector.on_packet(1000, &start), None);
        assert_eq!(detector.on_packet(1000, &end), Some('3'));
        assert_eq!(detector.on_packet(1000, &end), None);
        assert_eq!(detector.on_packet(1000, &end), None);
        assert_eq!(detector.on_packet(2600, &[11, 0x8A, 3, 32]), Some('#'));
        assert_eq!(detector.on_packet(4000, &[1, 0x80]), None);
    }
}
