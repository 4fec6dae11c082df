//! SIP transport for the switchboard.
//!
//! A single UDP socket carries all signaling. Received datagrams are parsed and
//! delivered as [`TransportEvent`]s over a bounded channel; malformed datagrams
//! are reported as `TransportEvent::Error` and never stop the loop.

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{bind_udp, Error, Result, Transport, TransportEvent, UdpTransport};
}
