use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use switchboard_sip_core::{parser::MAX_MESSAGE_SIZE, Message};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr).await.map_err(|e| Error::BindFailed(addr, e))?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: Arc::new(socket),
                local_addr,
                shutdown: CancellationToken::new(),
                events_tx,
            }),
        };

        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    // Spawns a task to receive packets from the UDP socket
    fn spawn_receive_loop(&self) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_MESSAGE_SIZE];

            loop {
                let received = tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    received = inner.socket.recv_from(&mut buf) => received,
                };

                match received {
                    Ok((len, src)) => {
                        let packet = &buf[..len];
                        // CRLF keep-alive pings carry no message
                        if packet.iter().all(|b| b.is_ascii_whitespace()) {
                            trace!("Keep-alive from {}", src);
                            continue;
                        }
                        debug!("Received {} bytes from {}", len, src);

                        let event = match switchboard_sip_core::parse_message(packet) {
                            Ok(message) => TransportEvent::MessageReceived {
                                message,
                                source: src,
                                destination: inner.local_addr,
                            },
                            Err(e) => {
                                warn!("Error parsing SIP message from {}: {}", src, e);
                                TransportEvent::Error {
                                    error: format!("Error parsing SIP message from {src}: {e}"),
                                }
                            }
                        };

                        if inner.events_tx.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping UDP receive loop");
                            break;
                        }
                    }
                    Err(e) => {
                        // ICMP port-unreachable surfaces here on some platforms
                        error!("Error receiving UDP packet: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("Error receiving packet: {e}"),
                            })
                            .await;
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let bytes = message.to_bytes();
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(bytes.len()));
        }

        match &message {
            Message::Request(req) => debug!("Sending {} ({} bytes) to {}", req.method, bytes.len(), destination),
            Message::Response(resp) => debug!("Sending {} ({} bytes) to {}", resp.status, bytes.len(), destination),
        }

        self.inner.socket.send_to(&bytes, destination).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
