//! One call's RTP stream: paced sending and the receive task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument};

use switchboard_codec_core::{g711, pcm_to_ulaw};
use switchboard_infra_common::call_span;
use switchboard_rtp_core::{CallMediaSocket, RtpPacketizer, TelephoneEventDetector};
use switchboard_sip_core::sdp::PAYLOAD_TYPE_TELEPHONE_EVENT;

use crate::error::Result;
use crate::registry::CallRegistry;
use crate::types::CallId;

/// Frame interval of the outbound stream
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Inbound μ-law payloads buffered per call before the receive task starts dropping
pub const AUDIO_CHANNEL_CAPACITY: usize = 256;

/// How a send ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug)]
pub struct MediaStream {
    call_id: CallId,
    socket: CallMediaSocket,
    peer: SocketAddr,
    telephone_event_pt: u8,
    // Held for a whole send, so utterances never interleave
    packetizer: Mutex<RtpPacketizer>,
    cancel: CancellationToken,
}

impl MediaStream {
    pub fn new(call_id: CallId, socket: CallMediaSocket, peer: SocketAddr, cancel: CancellationToken) -> Arc<Self> {
        Self::with_event_payload_type(call_id, socket, peer, PAYLOAD_TYPE_TELEPHONE_EVENT, cancel)
    }

    /// Stream whose peer sends telephone-event under `telephone_event_pt`
    pub fn with_event_payload_type(
        call_id: CallId,
        socket: CallMediaSocket,
        peer: SocketAddr,
        telephone_event_pt: u8,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            call_id,
            socket,
            peer,
            telephone_event_pt,
            packetizer: Mutex::new(RtpPacketizer::new(g711::PAYLOAD_TYPE)),
            cancel,
        })
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn lifetime(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Streams μ-law audio in 20 ms frames; stops early when the call ends
    pub async fn send_ulaw(&self, encoded: &[u8]) -> Result<SendOutcome> {
        if encoded.is_empty() {
            return Ok(SendOutcome::Completed);
        }
        let mut packetizer = self.packetizer.lock().await;
        let packets = packetizer.packetize(encoded);
        trace!(call_id = %self.call_id, "Sending {} frames to {}", packets.len(), self.peer);

        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        for packet in &packets {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(SendOutcome::Cancelled),
                _ = ticker.tick() => {}
            }
            self.socket.send_packet(packet, self.peer).await?;
        }
        Ok(SendOutcome::Completed)
    }

    /// Encodes linear PCM at `sample_rate` and streams it
    pub async fn send_pcm(&self, samples: &[i16], sample_rate: u32) -> Result<SendOutcome> {
        let encoded = pcm_to_ulaw(samples, sample_rate)?;
        self.send_ulaw(&encoded).await
    }

    /// Spawns the receive task.
    ///
    /// PCMU payloads from the negotiated peer IP go to the returned channel
    /// (dropped when it is full); telephone-event digits go to the call's digit
    /// channel in `registry`. The task ends with the call's lifetime.
    pub fn spawn_receiver(self: &Arc<Self>, registry: Arc<CallRegistry>) -> (mpsc::Receiver<Bytes>, JoinHandle<()>) {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let stream = self.clone();
        let span = call_span("media", self.call_id.as_str());
        let handle = tokio::spawn(async move { stream.receive_loop(audio_tx, registry).await }.instrument(span));
        (audio_rx, handle)
    }

    async fn receive_loop(&self, audio_tx: mpsc::Sender<Bytes>, registry: Arc<CallRegistry>) {
        let mut detector = TelephoneEventDetector::new();
        let mut dropped = 0u64;
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_packet() => received,
            };
            let (packet, source) = match received {
                Ok(received) => received,
                Err(e) => {
                    debug!("RTP receive error: {}", e);
                    tokio::time::sleep(FRAME_INTERVAL).await;
                    continue;
                }
            };
            if !self.accepts_source(source) {
                trace!("Ignoring RTP from unexpected source {}", source);
                continue;
            }

            let pt = packet.header.payload_type;
            if pt == g711::PAYLOAD_TYPE {
                if audio_tx.try_send(packet.payload).is_err() {
                    dropped += 1;
                    if dropped % 50 == 1 {
                        debug!("Inbound audio channel full, dropped {} frames", dropped);
                    }
                }
            } else if pt == self.telephone_event_pt {
                if let Some(digit) = detector.on_packet(packet.header.timestamp, &packet.payload) {
                    debug!("RFC 2833 digit {}", digit);
                    registry.push_digit(&self.call_id, digit);
                }
            } else {
                trace!("Ignoring RTP payload type {}", pt);
            }
        }
        if dropped > 0 {
            warn!("Dropped {} inbound audio frames", dropped);
        }
        trace!("RTP receive loop stopped");
    }

    fn accepts_source(&self, source: SocketAddr) -> bool {
        self.peer.ip().is_unspecified() || source.ip() == self.peer.ip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use switchboard_rtp_core::{MediaPortAllocator, RtpHeader, RtpPacket};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_send_continues_sequence_across_utterances() {
        let allocator = MediaPortAllocator::ephemeral(LOCALHOST);
        let ours = allocator.allocate().await.unwrap();
        let peer = allocator.allocate().await.unwrap();
        let stream = MediaStream::new("s1".into(), ours, peer.local_addr(), CancellationToken::new());

        stream.send_ulaw(&[0xFF; 320]).await.unwrap();
        stream.send_ulaw(&[0xFF; 100]).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            let (packet, _) = peer.recv_packet().await.unwrap();
            received.push(packet);
        }
        let seqs: Vec<u16> = received.iter().map(|p| p.header.sequence_number).collect();
        assert_eq!(seqs[1], seqs[0].wrapping_add(1));
        assert_eq!(seqs[2], seqs[1].wrapping_add(1));
        assert_eq!(received[2].header.timestamp, received[0].header.timestamp.wrapping_add(320));
        assert!(!received[0].header.marker);
        assert!(received[1].header.marker);
        assert!(received[2].header.marker);
    }

    #[tokio::test]
    async fn test_send_stops_when_cancelled() {
        let allocator = MediaPortAllocator::ephemeral(LOCALHOST);
        let ours = allocator.allocate().await.unwrap();
        let peer = allocator.allocate().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = MediaStream::new("s2".into(), ours, peer.local_addr(), cancel);
        assert_eq!(stream.send_ulaw(&[0xFF; 1600]).await.unwrap(), SendOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_receiver_filters_by_peer_and_payload_type() {
        let allocator = MediaPortAllocator::ephemeral(LOCALHOST);
        let ours = allocator.allocate().await.unwrap();
        let peer = allocator.allocate().await.unwrap();
        let cancel = CancellationToken::new();
        let stream = MediaStream::new("s3".into(), ours.clone(), peer.local_addr(), cancel.clone());
        let (mut audio, handle) = stream.spawn_receiver(Arc::new(CallRegistry::new()));

        let other_pt = RtpPacket::new(RtpHeader::new(8, 1, 0, 7), Bytes::from_static(&[1, 2, 3]));
        peer.send_packet(&other_pt, ours.local_addr()).await.unwrap();
        let pcmu = RtpPacket::new(RtpHeader::new(0, 2, 160, 7), Bytes::from_static(&[0xFF; 160]));
        peer.send_packet(&pcmu, ours.local_addr()).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(1), audio.recv()).await.unwrap().unwrap();
        assert_eq!(payload.len(), 160);

        cancel.cancel();
        handle.await.unwrap();
        assert!(audio.recv().await.is_none());
    }
}
