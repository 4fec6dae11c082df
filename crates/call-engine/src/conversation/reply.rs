//! Choosing what to say back.

use std::time::Duration;

use tracing::{debug, warn};

use crate::policy::AutomationProfile;
use crate::speech::Responder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Keyword,
    Responder,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

impl Reply {
    fn new(text: impl Into<String>, source: ReplySource) -> Self {
        Self { text: text.into(), source }
    }
}

/// Keyword table first, then the responder when free-form replies are on,
/// then the fallback message. `None` skips the turn.
pub async fn select_reply(
    profile: &AutomationProfile,
    text: &str,
    responder: Option<&dyn Responder>,
    timeout: Duration,
) -> Option<Reply> {
    if let Some(reply) = profile.keyword_reply(text) {
        debug!("Keyword reply");
        return Some(Reply::new(reply, ReplySource::Keyword));
    }

    let fallback = || profile.fallback_message.as_ref().map(|m| Reply::new(m.clone(), ReplySource::Fallback));

    if !profile.free_form {
        return fallback();
    }

    let Some(responder) = responder else {
        warn!("Free-form replies enabled but no response generator configured");
        return fallback();
    };
    match tokio::time::timeout(timeout, responder.query(text, profile.instructions.as_deref())).await {
        Ok(Ok(answer)) if !answer.trim().is_empty() => Some(Reply::new(answer.trim(), ReplySource::Responder)),
        Ok(Ok(_)) => {
            warn!("Response generator returned an empty reply");
            fallback()
        }
        Ok(Err(e)) => {
            warn!("Response generator failed: {}", e);
            fallback()
        }
        Err(_) => {
            warn!("Response generator timed out after {:?}", timeout);
            fallback()
        }
    }
}
