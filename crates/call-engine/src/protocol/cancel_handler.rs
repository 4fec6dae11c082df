//! CANCEL Request Handler
//!
//! Cancels inbound calls according to RFC 3261 Section 9.2.
//!
//! - INVITE still being processed: the CANCEL gets `200 OK` and the INVITE
//!   handler answers `487` instead of `200 OK`
//! - Call still waiting for its ACK: the pending entry is removed, the CANCEL
//!   gets `200 OK` and the INVITE `487 Request Terminated`
//! - ACK already processed: the call is torn down exactly like a BYE
//! - Nothing known: `481`

use std::net::SocketAddr;

use chrono::Utc;
use tracing::{info, warn};

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::error::{CallEngineError, Result};
use crate::registry::CancelTarget;
use crate::store::persist_call;
use crate::types::{CallId, CallRecordStatus};

/// CANCEL-specific handling operations
pub trait CancelHandler {
    /// Handle a CANCEL for a pending INVITE
    fn handle_cancel_method(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl CancelHandler for CallController {
    async fn handle_cancel_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(call_id) = request.call_id().map(CallId::from) else {
            self.respond(&request, StatusCode::BadRequest, source).await?;
            return Err(CallEngineError::protocol("CANCEL without Call-ID"));
        };

        let pending = match self.registry.cancel_invite(&call_id) {
            CancelTarget::Inviting => {
                // The INVITE handler answers the INVITE with 487
                info!(call_id = %call_id, "Call cancelled while the INVITE is processed");
                return self.respond(&request, StatusCode::Ok, source).await;
            }
            CancelTarget::Pending(pending) => Some(pending),
            CancelTarget::Unknown => None,
        };
        if let Some(pending) = pending {
            info!(call_id = %call_id, "Call cancelled before ACK");
            self.respond(&request, StatusCode::Ok, source).await?;
            let local_tag = pending.dialog.local.tag.clone().unwrap_or_default();
            let terminated = create_response_with_tag(&pending.invite, StatusCode::RequestTerminated, &local_tag);
            self.send_message(terminated, pending.dialog.peer).await?;

            let ended_at = Utc::now();
            persist_call(self.call_store.as_ref(), &call_id, move |record| {
                record.mark_ended(CallRecordStatus::Cancelled, ended_at)
            })
            .await;
            return Ok(());
        }

        if let Some(call) = self.registry.remove_inbound(&call_id) {
            info!(call_id = %call_id, "CANCEL after ACK, ending call");
            self.respond(&request, StatusCode::Ok, source).await?;
            self.end_inbound(call, CallRecordStatus::Cancelled).await;
            return Ok(());
        }

        warn!(call_id = %call_id, "CANCEL from {} for unknown call", source);
        self.respond(&request, StatusCode::CallOrTransactionDoesNotExist, source).await
    }
}
