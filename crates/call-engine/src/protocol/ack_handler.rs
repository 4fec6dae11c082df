//! ACK Request Handler
//!
//! Completes the three-way INVITE handshake (RFC 3261 Section 13.3.1.4).
//! The pending entry written by the INVITE handler is consumed exactly once;
//! an ACK for a call we know nothing about is a race with the peer hanging up
//! or cancelling and is only logged.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::error::{CallEngineError, Result};
use crate::types::CallId;

/// ACK-specific handling operations
pub trait AckHandler {
    /// Handle an ACK confirming one of our 200 OKs
    fn handle_ack_method(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl AckHandler for CallController {
    async fn handle_ack_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        let call_id = request
            .call_id()
            .map(CallId::from)
            .ok_or_else(|| CallEngineError::protocol("ACK without Call-ID"))?;

        let Some(pending) = self.registry.take_pending(&call_id) else {
            if self.registry.is_inbound_active(&call_id) {
                debug!(call_id = %call_id, "Duplicate ACK");
            } else {
                warn!(call_id = %call_id, "ACK from {} for unknown call", source);
            }
            return Ok(());
        };

        info!(call_id = %call_id, "Call established (automated={})", pending.automated);
        self.start_inbound_session(pending);
        Ok(())
    }
}
