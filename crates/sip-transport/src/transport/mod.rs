pub mod udp;

use std::net::SocketAddr;

use async_trait::async_trait;
use switchboard_sip_core::Message;

use crate::error::Result;

/// Events emitted by a transport's receive loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message was received
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },

    /// A datagram arrived that could not be parsed or the socket failed
    Error { error: String },

    /// The transport was closed
    Closed,
}

/// Sends SIP messages to a peer
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the local address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Sends one message to the given destination
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()>;

    /// Stops the receive loop; later sends fail with `TransportClosed`
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
