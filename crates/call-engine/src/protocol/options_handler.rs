//! OPTIONS Request Handler (RFC 3261 Section 11).
//!
//! Always answers `200 OK` with the supported verb set.

use std::net::SocketAddr;

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::error::Result;

/// OPTIONS-specific handling operations
pub trait OptionsHandler {
    fn handle_options_method(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl OptionsHandler for CallController {
    async fn handle_options_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        let response = create_response(&request, StatusCode::Ok)
            .with_header(HeaderName::Allow, Method::allow_header_value())
            .with_header(HeaderName::Accept, SDP_CONTENT_TYPE);
        self.send_message(response, source).await
    }
}
