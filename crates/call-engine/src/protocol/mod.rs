//! SIP method handlers for call control.
//!
//! Each verb has its own handler trait implemented on [`CallController`],
//! following RFC 3261 for the subset of behaviour the switchboard needs.
//! [`CallController::handle_message`] is the single entry point used by the
//! server's transport loop.
//!
//! Handler errors never reach the peer on their own: anything the peer must
//! see is sent as a response inside the handler, the rest is logged here.

pub mod ack_handler;
pub mod bye_handler;
pub mod cancel_handler;
pub mod info_handler;
pub mod invite_handler;
pub mod options_handler;
pub mod register_handler;
pub mod response_handler;

use std::net::SocketAddr;

use tracing::{debug, warn};

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::error::Result;

pub use ack_handler::AckHandler;
pub use bye_handler::ByeHandler;
pub use cancel_handler::CancelHandler;
pub use info_handler::{parse_dtmf_body, InfoHandler};
pub use invite_handler::InviteHandler;
pub use options_handler::OptionsHandler;
pub use register_handler::RegisterHandler;
pub use response_handler::ResponseHandler;

impl CallController {
    /// Routes one received message to its handler
    pub async fn handle_message(&self, message: Message, source: SocketAddr) {
        match message {
            Message::Request(request) => self.handle_request(request, source).await,
            Message::Response(response) => {
                let status = response.status;
                if let Err(e) = self.handle_response_message(response, source).await {
                    warn!("Failed to handle {} response from {}: {}", status.as_u16(), source, e);
                }
            }
        }
    }

    async fn handle_request(&self, request: Request, source: SocketAddr) {
        let method = request.method.clone();
        let call_id = request.call_id().unwrap_or("-").to_string();
        debug!(call_id = %call_id, "{} from {}", method, source);

        let result = match method {
            Method::Invite => self.handle_invite_method(request, source).await,
            Method::Ack => self.handle_ack_method(request, source).await,
            Method::Bye => self.handle_bye_method(request, source).await,
            Method::Cancel => self.handle_cancel_method(request, source).await,
            Method::Register => self.handle_register_method(request, source).await,
            Method::Options => self.handle_options_method(request, source).await,
            Method::Info => self.handle_info_method(request, source).await,
            Method::Extension(_) => self.handle_unknown_method(request, source).await,
        };

        if let Err(e) = result {
            warn!(call_id = %call_id, "Failed to handle {} from {}: {}", method, source, e);
        }
    }

    /// 501 for anything we do not implement, except a mangled ACK
    async fn handle_unknown_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        if matches!(request.cseq(), Some((_, Method::Ack))) {
            debug!("Treating {} with an ACK CSeq as ACK", request.method);
            return self.handle_ack_method(request, source).await;
        }
        self.respond(&request, StatusCode::NotImplemented, source).await
    }
}
