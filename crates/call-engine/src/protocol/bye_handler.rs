//! BYE Request Handler
//!
//! Terminates calls according to RFC 3261 Section 15.1.2.
//!
//! ## Processing Steps
//!
//! 1. Find the call: active inbound, answered outbound, or an inbound call
//!    still waiting for its ACK
//! 2. Tear it down: cancel the call's lifetime, persist the end, schedule the
//!    recording attachment
//! 3. Send `200 OK`
//!
//! A BYE matching nothing gets `481 Call/Transaction Does Not Exist`.

use std::net::SocketAddr;

use chrono::Utc;
use tracing::{info, warn};

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::error::{CallEngineError, Result};
use crate::store::persist_call;
use crate::types::{CallId, CallRecordStatus, OutboundStatus};

/// BYE-specific handling operations
pub trait ByeHandler {
    /// Handle a BYE ending one of our calls
    fn handle_bye_method(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl ByeHandler for CallController {
    async fn handle_bye_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(call_id) = request.call_id().map(CallId::from) else {
            self.respond(&request, StatusCode::BadRequest, source).await?;
            return Err(CallEngineError::protocol("BYE without Call-ID"));
        };

        if let Some(call) = self.registry.remove_inbound(&call_id) {
            info!(call_id = %call_id, "Peer hung up");
            self.respond(&request, StatusCode::Ok, source).await?;
            self.end_inbound(call, CallRecordStatus::Ended).await;
            return Ok(());
        }

        if self.end_outbound_by_peer(&call_id).await {
            return self.respond(&request, StatusCode::Ok, source).await;
        }

        if self.registry.take_pending(&call_id).is_some() {
            info!(call_id = %call_id, "Peer hung up before ACK");
            self.respond(&request, StatusCode::Ok, source).await?;
            let ended_at = Utc::now();
            persist_call(self.call_store.as_ref(), &call_id, move |record| {
                record.mark_ended(CallRecordStatus::Ended, ended_at)
            })
            .await;
            return Ok(());
        }

        warn!(call_id = %call_id, "BYE from {} for unknown call", source);
        self.respond(&request, StatusCode::CallOrTransactionDoesNotExist, source).await
    }
}

impl CallController {
    /// Ends an answered outbound call the peer hung up; false if there is none
    async fn end_outbound_by_peer(&self, call_id: &CallId) -> bool {
        let ended = self.registry.with_outbound(call_id, |call| {
            if !call.transition(OutboundStatus::Ended) {
                return None;
            }
            call.cancel.cancel();
            Some(call.recording_path.clone())
        });
        let Ok(Some(recording)) = ended else {
            return false;
        };

        info!(call_id = %call_id, "Peer hung up outbound call");
        let ended_at = Utc::now();
        persist_call(self.call_store.as_ref(), call_id, move |record| {
            record.mark_ended(CallRecordStatus::Ended, ended_at)
        })
        .await;
        if let Some(path) = recording {
            self.attach_recording_later(call_id.clone(), path);
        }
        true
    }
}
