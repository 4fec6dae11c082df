//! Minimal SDP (RFC 4566) model for single-stream audio offer/answer.
//!
//! Only the lines that decide where and how to send audio are interpreted:
//! `c=`, `m=audio` and `a=rtpmap`. Everything else is ignored on parse.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Static payload type for G.711 μ-law
pub const PAYLOAD_TYPE_PCMU: u8 = 0;

/// Dynamic payload type advertised for RFC 2833 telephone-event
pub const PAYLOAD_TYPE_TELEPHONE_EVENT: u8 = 101;

/// MIME type for SDP bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// An `a=rtpmap` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding: String,
    pub clock_rate: u32,
}

/// The audio-relevant part of a session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub session_id: u64,
    pub session_version: u64,
    pub origin_address: IpAddr,
    pub connection_address: IpAddr,
    pub audio_port: u16,
    pub payload_types: Vec<u8>,
    pub rtpmaps: Vec<RtpMap>,
}

impl SessionDescription {
    /// Local audio description offering PCMU plus telephone-event
    pub fn audio(address: IpAddr, port: u16, session_id: u64) -> Self {
        Self {
            session_id,
            session_version: session_id,
            origin_address: address,
            connection_address: address,
            audio_port: port,
            payload_types: vec![PAYLOAD_TYPE_PCMU, PAYLOAD_TYPE_TELEPHONE_EVENT],
            rtpmaps: vec![
                RtpMap { payload_type: PAYLOAD_TYPE_PCMU, encoding: "PCMU".into(), clock_rate: 8000 },
                RtpMap {
                    payload_type: PAYLOAD_TYPE_TELEPHONE_EVENT,
                    encoding: "telephone-event".into(),
                    clock_rate: 8000,
                },
            ],
        }
    }

    /// Where the peer wants to receive RTP
    pub fn media_addr(&self) -> SocketAddr {
        SocketAddr::new(self.connection_address, self.audio_port)
    }

    pub fn supports_payload_type(&self, pt: u8) -> bool {
        self.payload_types.contains(&pt)
    }

    /// Payload type the peer uses for telephone-event, if offered
    pub fn telephone_event_payload_type(&self) -> Option<u8> {
        self.rtpmaps
            .iter()
            .find(|m| m.encoding.eq_ignore_ascii_case("telephone-event"))
            .map(|m| m.payload_type)
    }

    /// Answer to a peer's offer: PCMU is mandatory, telephone-event mirrors the offer's payload type
    pub fn answer_to(offer: &SessionDescription, address: IpAddr, port: u16, session_id: u64) -> Result<Self> {
        if !offer.supports_payload_type(PAYLOAD_TYPE_PCMU) {
            return Err(Error::InvalidSdp("offer does not include PCMU".to_string()));
        }
        let mut answer = Self::audio(address, port, session_id);
        match offer.telephone_event_payload_type() {
            Some(pt) => {
                answer.payload_types = vec![PAYLOAD_TYPE_PCMU, pt];
                if let Some(map) = answer.rtpmaps.iter_mut().find(|m| m.encoding == "telephone-event") {
                    map.payload_type = pt;
                }
            }
            None => {
                answer.payload_types = vec![PAYLOAD_TYPE_PCMU];
                answer.rtpmaps.retain(|m| m.payload_type == PAYLOAD_TYPE_PCMU);
            }
        }
        Ok(answer)
    }
}

fn ip_kind(addr: &IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        write!(
            f,
            "o=switchboard {} {} IN {} {}\r\n",
            self.session_id,
            self.session_version,
            ip_kind(&self.origin_address),
            self.origin_address
        )?;
        write!(f, "s=switchboard\r\n")?;
        write!(f, "c=IN {} {}\r\n", ip_kind(&self.connection_address), self.connection_address)?;
        write!(f, "t=0 0\r\n")?;
        let pts: Vec<String> = self.payload_types.iter().map(u8::to_string).collect();
        write!(f, "m=audio {} RTP/AVP {}\r\n", self.audio_port, pts.join(" "))?;
        for map in &self.rtpmaps {
            write!(f, "a=rtpmap:{} {}/{}\r\n", map.payload_type, map.encoding, map.clock_rate)?;
            if map.encoding.eq_ignore_ascii_case("telephone-event") {
                write!(f, "a=fmtp:{} 0-16\r\n", map.payload_type)?;
            }
        }
        write!(f, "a=ptime:20\r\n")?;
        write!(f, "a=sendrecv\r\n")
    }
}

fn parse_connection(value: &str) -> Result<IpAddr> {
    // IN IP4 192.0.2.1[/ttl]
    let addr = value
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| Error::InvalidSdp(format!("bad connection line '{value}'")))?;
    let addr = addr.split('/').next().unwrap_or(addr);
    addr.parse()
        .map_err(|_| Error::InvalidSdp(format!("bad connection address '{addr}'")))
}

impl FromStr for SessionDescription {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut session_id = 0;
        let mut session_version = 0;
        let mut origin_address = None;
        let mut session_connection = None;
        let mut media_connection = None;
        let mut audio: Option<(u16, Vec<u8>)> = None;
        let mut in_audio = false;
        let mut rtpmaps = Vec::new();

        for line in s.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((kind, value)) = line.split_once('=') else {
                return Err(Error::InvalidSdp(format!("malformed line '{line}'")));
            };
            match kind {
                "o" => {
                    let fields: Vec<&str> = value.split_whitespace().collect();
                    if fields.len() >= 6 {
                        session_id = fields[1].parse().unwrap_or(0);
                        session_version = fields[2].parse().unwrap_or(0);
                        origin_address = fields[5].parse().ok();
                    }
                }
                "c" if in_audio => media_connection = Some(parse_connection(value)?),
                "c" => session_connection = Some(parse_connection(value)?),
                "m" => {
                    let fields: Vec<&str> = value.split_whitespace().collect();
                    in_audio = fields.first() == Some(&"audio") && audio.is_none();
                    if in_audio {
                        let port = fields
                            .get(1)
                            .and_then(|p| p.split('/').next())
                            .and_then(|p| p.parse::<u16>().ok())
                            .ok_or_else(|| Error::InvalidSdp(format!("bad media line '{value}'")))?;
                        let pts = fields.iter().skip(3).filter_map(|p| p.parse().ok()).collect();
                        audio = Some((port, pts));
                    }
                }
                "a" if in_audio => {
                    if let Some(map) = value.strip_prefix("rtpmap:") {
                        if let Some(parsed) = parse_rtpmap(map) {
                            rtpmaps.push(parsed);
                        }
                    }
                }
                _ => {}
            }
        }

        let (audio_port, payload_types) =
            audio.ok_or_else(|| Error::InvalidSdp("no audio media line".to_string()))?;
        let connection_address = media_connection
            .or(session_connection)
            .ok_or_else(|| Error::InvalidSdp("no connection address".to_string()))?;

        Ok(SessionDescription {
            session_id,
            session_version,
            origin_address: origin_address.unwrap_or(connection_address),
            connection_address,
            audio_port,
            payload_types,
            rtpmaps,
        })
    }
}

fn parse_rtpmap(value: &str) -> Option<RtpMap> {
    let (pt, rest) = value.split_once(' ')?;
    let mut parts = rest.split('/');
    Some(RtpMap {
        payload_type: pt.trim().parse().ok()?,
        encoding: parts.next()?.trim().to_string(),
        clock_rate: parts.next()?.trim().parse().ok()?,
    })
}
