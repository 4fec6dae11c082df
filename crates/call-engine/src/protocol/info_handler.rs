//! INFO Request Handler
//!
//! Mid-call DTMF relay (RFC 6086 INFO carrying `application/dtmf-relay` or
//! `application/dtmf` bodies). The digit is pushed onto the call's digit
//! channel without waiting; a full channel drops it.

use std::net::SocketAddr;

use tracing::{debug, warn};

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::error::{CallEngineError, Result};
use crate::registry::DigitDelivery;
use crate::types::CallId;

/// INFO-specific handling operations
pub trait InfoHandler {
    /// Handle an INFO carrying a DTMF digit
    fn handle_info_method(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl InfoHandler for CallController {
    async fn handle_info_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(call_id) = request.call_id().map(CallId::from) else {
            self.respond(&request, StatusCode::BadRequest, source).await?;
            return Err(CallEngineError::protocol("INFO without Call-ID"));
        };
        if !self.registry.is_inbound_active(&call_id) {
            warn!(call_id = %call_id, "INFO from {} for unknown call", source);
            return self.respond(&request, StatusCode::CallOrTransactionDoesNotExist, source).await;
        }

        let body = request.body_str().unwrap_or_default();
        let Some(digit) = parse_dtmf_body(request.content_type(), body) else {
            debug!(call_id = %call_id, "Unparseable INFO body {:?}", body);
            return self.respond(&request, StatusCode::BadRequest, source).await;
        };

        match self.registry.push_digit(&call_id, digit) {
            DigitDelivery::Delivered => debug!(call_id = %call_id, "DTMF digit {}", digit),
            DigitDelivery::Dropped => {}
            DigitDelivery::NoSuchCall => {
                return self.respond(&request, StatusCode::CallOrTransactionDoesNotExist, source).await;
            }
        }
        self.respond(&request, StatusCode::Ok, source).await
    }
}

/// Extracts the digit from a DTMF INFO body.
///
/// `application/dtmf-relay` carries `Signal=5` (plus an optional `Duration=`
/// line); `application/dtmf` carries just `5`. Without a content type both
/// forms are tried.
pub fn parse_dtmf_body(content_type: Option<&str>, body: &str) -> Option<char> {
    let media_type = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .unwrap_or_default();
    match media_type.as_str() {
        "application/dtmf-relay" => relay_signal(body),
        "application/dtmf" => single_digit(body),
        _ => relay_signal(body).or_else(|| single_digit(body)),
    }
}

fn relay_signal(body: &str) -> Option<char> {
    body.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("signal") {
            single_digit(value)
        } else {
            None
        }
    })
}

fn single_digit(value: &str) -> Option<char> {
    let mut chars = value.trim().chars();
    let digit = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !is_dtmf_digit(digit) {
        return None;
    }
    Some(digit)
}

fn is_dtmf_digit(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D')
}
