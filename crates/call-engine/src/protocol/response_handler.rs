//! SIP Response Handler
//!
//! Responses only ever belong to INVITEs we originated (or to the BYE/CANCEL
//! requests that follow them).
//!
//! ## Routing
//!
//! - While the call's driver is waiting, INVITE responses are forwarded to it
//!   and it applies the status transitions
//! - Once the call left `requesting`/`ringing`, late responses are answered
//!   here: a final error (typically `487` after our CANCEL) is ACKed, a `2xx`
//!   is ACKed and, if the call is no longer wanted, followed by a BYE
//! - Responses to BYE and CANCEL need no action

use std::net::SocketAddr;

use tokio::sync::mpsc::error::SendError;
use tracing::{debug, info, trace};

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::dialog::{create_ack_for_error, Dialog};
use crate::error::{CallEngineError, Result};
use crate::types::{CallId, OutboundStatus};

/// Response-specific handling operations
pub trait ResponseHandler {
    /// Handle a response to one of our requests
    fn handle_response_message(
        &self,
        response: Response,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl ResponseHandler for CallController {
    async fn handle_response_message(&self, response: Response, source: SocketAddr) -> Result<()> {
        let call_id = response
            .call_id()
            .map(CallId::from)
            .ok_or_else(|| CallEngineError::protocol("response without Call-ID"))?;
        let Some((_, method)) = response.cseq() else {
            return Err(CallEngineError::protocol("response without CSeq"));
        };
        if method != Method::Invite {
            trace!(call_id = %call_id, "{} response to {}", response.status.as_u16(), method);
            return Ok(());
        }
        if !self.registry.is_outbound(&call_id) {
            debug!(call_id = %call_id, "Response from {} for unknown call", source);
            return Ok(());
        }

        let response = match self.registry.outbound_response_sender(&call_id) {
            Some(driver) => match driver.send(response).await {
                Ok(()) => return Ok(()),
                Err(SendError(response)) => response,
            },
            None => response,
        };
        self.handle_late_response(&call_id, response).await
    }
}

impl CallController {
    async fn handle_late_response(&self, call_id: &CallId, response: Response) -> Result<()> {
        let (invite, target, status) = self
            .registry
            .with_outbound(call_id, |call| (call.invite.clone(), call.target, call.status()))?;

        if response.status.is_success() {
            let ack = create_ack_for_2xx(&invite, &response, self.contact_addr());
            self.send_message(ack, target).await?;
            if status != OutboundStatus::Answered {
                // Answered after we gave up on it
                if let Some(mut dialog) = Dialog::for_outbound(&invite, &response, target) {
                    info!(call_id = %call_id, "Late 200 OK on {} call, sending BYE", status);
                    let bye = dialog.create_bye(self.contact_addr());
                    self.send_message(bye, dialog.peer).await?;
                }
            }
        } else if response.status.is_final() {
            debug!(call_id = %call_id, "ACKing late {}", response.status.as_u16());
            self.send_message(create_ack_for_error(&invite, &response), target).await?;
        }
        Ok(())
    }
}
