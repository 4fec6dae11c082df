//! Per-call RTP sockets.
//!
//! Every call gets its own UDP socket from a configured port range, so inbound
//! media is attributed to a call by the local port it arrives on. The port
//! returns to the pool when the last handle to the socket is dropped.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::packet::RtpPacket;
use crate::Result;

/// Largest datagram the receive path accepts
pub const MAX_RTP_PACKET_SIZE: usize = 1500;

struct AllocatorInner {
    bind_ip: IpAddr,
    start: u16,
    end: u16,
    state: Mutex<AllocatorState>,
}

struct AllocatorState {
    in_use: HashSet<u16>,
    cursor: u16,
}

/// Hands out RTP sockets on even ports from `[start, end]`.
///
/// A range starting at port 0 binds OS-assigned ports instead (used in tests
/// and single-host setups).
#[derive(Clone)]
pub struct MediaPortAllocator {
    inner: Arc<AllocatorInner>,
}

impl MediaPortAllocator {
    pub fn new(bind_ip: IpAddr, start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidParameter(format!("RTP port range {start}-{end} is empty")));
        }
        let first = if start % 2 == 0 { start } else { start.saturating_add(1) };
        Ok(Self {
            inner: Arc::new(AllocatorInner {
                bind_ip,
                start,
                end,
                state: Mutex::new(AllocatorState { in_use: HashSet::new(), cursor: first }),
            }),
        })
    }

    /// Allocator that lets the OS pick every port
    pub fn ephemeral(bind_ip: IpAddr) -> Self {
        Self {
            inner: Arc::new(AllocatorInner {
                bind_ip,
                start: 0,
                end: 0,
                state: Mutex::new(AllocatorState { in_use: HashSet::new(), cursor: 0 }),
            }),
        }
    }

    pub fn bind_ip(&self) -> IpAddr {
        self.inner.bind_ip
    }

    /// Ports currently leased out
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().in_use.len()
    }

    /// Binds a socket on the next free even port
    pub async fn allocate(&self) -> Result<CallMediaSocket> {
        if self.inner.start == 0 {
            let socket = UdpSocket::bind(SocketAddr::new(self.inner.bind_ip, 0)).await?;
            return CallMediaSocket::from_socket(socket, None);
        }

        let candidates = self.even_port_count();
        for _ in 0..candidates {
            let Some(port) = self.reserve_next() else {
                break;
            };
            match UdpSocket::bind(SocketAddr::new(self.inner.bind_ip, port)).await {
                Ok(socket) => {
                    debug!("Allocated RTP port {}", port);
                    let lease = PortLease { allocator: self.inner.clone(), port };
                    return CallMediaSocket::from_socket(socket, Some(lease));
                }
                Err(e) => {
                    warn!("RTP port {} unavailable: {}", port, e);
                    self.inner.state.lock().in_use.remove(&port);
                }
            }
        }

        Err(Error::PortsExhausted { start: self.inner.start, end: self.inner.end })
    }

    fn even_port_count(&self) -> usize {
        (self.inner.start..=self.inner.end).filter(|p| p % 2 == 0).count()
    }

    // Marks the next free even port as used and advances the cursor past it
    fn reserve_next(&self) -> Option<u16> {
        let mut state = self.inner.state.lock();
        let count = self.even_port_count();
        for _ in 0..count {
            let port = state.cursor;
            let next = port.saturating_add(2);
            state.cursor = if next > self.inner.end || next < port { self.first_even() } else { next };
            if port >= self.inner.start && port <= self.inner.end && state.in_use.insert(port) {
                return Some(port);
            }
        }
        None
    }

    fn first_even(&self) -> u16 {
        if self.inner.start % 2 == 0 {
            self.inner.start
        } else {
            self.inner.start.saturating_add(1)
        }
    }
}

struct PortLease {
    allocator: Arc<AllocatorInner>,
    port: u16,
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.allocator.state.lock().in_use.remove(&self.port);
        trace!("Released RTP port {}", self.port);
    }
}

struct CallMediaSocketInner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    _lease: Option<PortLease>,
}

/// One call's RTP socket. Clones share the socket and the port lease.
#[derive(Clone)]
pub struct CallMediaSocket {
    inner: Arc<CallMediaSocketInner>,
}

impl CallMediaSocket {
    fn from_socket(socket: UdpSocket, lease: Option<PortLease>) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            inner: Arc::new(CallMediaSocketInner { socket, local_addr, _lease: lease }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub async fn send_packet(&self, packet: &RtpPacket, destination: SocketAddr) -> Result<()> {
        trace!("Sending {} to {}", packet, destination);
        self.inner.socket.send_to(&packet.serialize(), destination).await?;
        Ok(())
    }

    /// Receives the next datagram that parses as RTP; malformed datagrams are skipped
    pub async fn recv_packet(&self) -> Result<(RtpPacket, SocketAddr)> {
        let mut buf = [0u8; MAX_RTP_PACKET_SIZE];
        loop {
            let (len, source) = self.inner.socket.recv_from(&mut buf).await?;
            match RtpPacket::parse(&buf[..len]) {
                Ok(packet) => return Ok((packet, source)),
                Err(e) => trace!("Dropping non-RTP datagram from {}: {}", source, e),
            }
        }
    }
}

impl std::fmt::Debug for CallMediaSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CallMediaSocket({})", self.inner.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_rejects_empty_range() {
        assert!(MediaPortAllocator::new(LOCALHOST, 30010, 30000).is_err());
    }

    #[tokio::test]
    async fn test_even_ports_and_release() {
        let allocator = MediaPortAllocator::new(LOCALHOST, 41001, 41006).unwrap();
        let a = allocator.allocate().await.unwrap();
        let b = allocator.allocate().await.unwrap();
        assert_eq!(a.local_addr().port() % 2, 0);
        assert_eq!(b.local_addr().port() % 2, 0);
        assert_ne!(a.local_addr(), b.local_addr());
        assert_eq!(allocator.in_use(), 2);

        let a_clone = a.clone();
        drop(a);
        assert_eq!(allocator.in_use(), 2);
        drop(a_clone);
        assert_eq!(allocator.in_use(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let allocator = MediaPortAllocator::new(LOCALHOST, 41100, 41101).unwrap();
        let _held = allocator.allocate().await.unwrap();
        assert!(matches!(allocator.allocate().await, Err(Error::PortsExhausted { .. })));
    }
}
