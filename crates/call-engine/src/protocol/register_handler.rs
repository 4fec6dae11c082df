//! REGISTER Request Handler
//!
//! Handles registrations according to RFC 3261 Section 10.3.
//!
//! ## Registration Processing
//!
//! - **Directory check**: when a directory is configured, unknown users get
//!   `404` and disabled users `403`; a failing directory does not block
//! - **Expires**: `Expires` header, else the Contact `expires` parameter, else
//!   the configured default; capped at the configured maximum
//! - **De-registration**: `Expires: 0` removes the binding
//! - **Binding**: the source address of the REGISTER is stored as the user's
//!   reachable address; the last registration wins

use std::net::SocketAddr;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use switchboard_sip_core::prelude::*;

use crate::controller::CallController;
use crate::error::{CallEngineError, Result};
use crate::types::{RegisteredEndpoint, UserRecord};

/// REGISTER-specific handling operations
pub trait RegisterHandler {
    /// Handle REGISTER requests (non-dialog)
    fn handle_register_method(
        &self,
        request: Request,
        source: SocketAddr,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl RegisterHandler for CallController {
    async fn handle_register_method(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(username) = request.to_addr().and_then(|to| to.uri.user) else {
            self.respond(&request, StatusCode::BadRequest, source).await?;
            return Err(CallEngineError::protocol("REGISTER without a user in To"));
        };
        debug!("Processing REGISTER for {} from {}", username, source);

        let user = match self.lookup_registrant(&username).await {
            Ok(user) => user,
            Err(status) => {
                warn!("Rejecting REGISTER for {} with {}", username, status.as_u16());
                return self.respond(&request, status, source).await;
            }
        };

        let expires = self.extract_expires(&request);
        let now = Utc::now();
        let mut response = create_response(&request, StatusCode::Ok);

        if expires == 0 {
            if self.registry.remove_endpoint(&username).is_some() {
                info!("Unregistered {}", username);
            }
        } else {
            let expires_at = now + Duration::seconds(i64::from(expires));
            self.registry.register_endpoint(RegisteredEndpoint {
                username: username.clone(),
                addr: source,
                expires_at,
            });
            info!("Registered {} at {} for {}s", username, source, expires);

            if let Some(mut user) = user {
                user.contact = Some(source);
                user.expires_at = Some(expires_at);
                user.registration_count += 1;
                user.last_registered_at = Some(now);
                self.save_registrant(user).await;
            }
        }

        if let Some(contact) = request.contact() {
            response = response.with_header(HeaderName::Contact, format!("<{}>;expires={}", contact.uri, expires));
        }
        response = response.with_header(HeaderName::Expires, expires.to_string());
        self.send_message(response, source).await
    }
}

impl CallController {
    /// Directory entry for `username`, or the status to reject with
    async fn lookup_registrant(&self, username: &str) -> std::result::Result<Option<UserRecord>, StatusCode> {
        let Some(directory) = &self.directory else {
            return Ok(None);
        };
        match directory.find_user(username).await {
            Ok(Some(user)) if user.enabled => Ok(Some(user)),
            Ok(Some(_)) => Err(StatusCode::Forbidden),
            Ok(None) => Err(StatusCode::NotFound),
            Err(e) => {
                warn!("Directory lookup for {} failed, accepting registration: {}", username, e);
                Ok(None)
            }
        }
    }

    async fn save_registrant(&self, user: UserRecord) {
        let Some(directory) = &self.directory else {
            return;
        };
        let username = user.username.clone();
        if let Err(e) = directory.save_user(user).await {
            warn!("Failed to save registration of {}: {}", username, e);
        }
    }

    /// Granted registration lifetime in seconds
    fn extract_expires(&self, request: &Request) -> u32 {
        let signaling = &self.config.signaling;
        request
            .expires()
            .or_else(|| {
                request
                    .header(&HeaderName::Contact)
                    .and_then(|contact| header_param(contact, "expires"))
                    .and_then(|value| value.parse().ok())
            })
            .unwrap_or(signaling.default_register_expires)
            .min(signaling.max_register_expires)
    }
}
