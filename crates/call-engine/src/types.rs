//! Shared data types: call identifiers, call/user records and the outbound
//! call status machine.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The SIP Call-ID of one call leg; keys every registry map
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system friendly form (`@`, `/` and `:` replaced)
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Status persisted on a call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRecordStatus {
    Ringing,
    Answered,
    Ended,
    Failed,
    Cancelled,
}

/// Call history entry written to the external call store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub from: String,
    pub to: String,
    pub status: CallRecordStatus,
    pub automated: bool,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub recording_path: Option<PathBuf>,
}

impl CallRecord {
    pub fn new(call_id: CallId, direction: CallDirection, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            call_id,
            direction,
            from: from.into(),
            to: to.into(),
            status: CallRecordStatus::Ringing,
            automated: false,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_secs: None,
            recording_path: None,
        }
    }

    /// Marks the record ended and computes the talk time from the answer time
    pub fn mark_ended(&mut self, status: CallRecordStatus, at: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(at);
        self.duration_secs = self.answered_at.map(|answered| (at - answered).num_seconds().max(0));
    }
}

/// Directory entry for a local user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub enabled: bool,
    pub contact: Option<SocketAddr>,
    pub expires_at: Option<DateTime<Utc>>,
    pub registration_count: u64,
    pub last_registered_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            enabled: true,
            contact: None,
            expires_at: None,
            registration_count: 0,
            last_registered_at: None,
        }
    }
}

/// Last known reachable address of a registered user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredEndpoint {
    pub username: String,
    pub addr: SocketAddr,
    pub expires_at: DateTime<Utc>,
}

impl RegisteredEndpoint {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Status of a call this server originated.
///
/// `requesting → {ringing} → answered → ended`, or
/// `requesting|ringing → failed|cancelled`. Transitions never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundStatus {
    Requesting,
    Ringing,
    Answered,
    Failed,
    Cancelled,
    Ended,
}

impl OutboundStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Ended)
    }

    pub fn can_transition_to(self, next: OutboundStatus) -> bool {
        use OutboundStatus::*;
        matches!(
            (self, next),
            (Requesting, Ringing | Answered | Failed | Cancelled)
                | (Ringing, Answered | Failed | Cancelled)
                | (Answered, Ended)
        )
    }
}

impl fmt::Display for OutboundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requesting => "requesting",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of an outbound call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCallSnapshot {
    pub call_id: CallId,
    pub target: SocketAddr,
    pub status: OutboundStatus,
    pub transitions: Vec<(OutboundStatus, DateTime<Utc>)>,
    pub recording_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use OutboundStatus::*;

    #[test]
    fn test_outbound_transitions_are_monotonic() {
        assert!(Requesting.can_transition_to(Ringing));
        assert!(Requesting.can_transition_to(Answered));
        assert!(Ringing.can_transition_to(Cancelled));
        assert!(Answered.can_transition_to(Ended));

        assert!(!Ringing.can_transition_to(Requesting));
        assert!(!Answered.can_transition_to(Cancelled));
        assert!(!Answered.can_transition_to(Failed));
        for terminal in [Failed, Cancelled, Ended] {
            assert!(terminal.is_terminal());
            for next in [Requesting, Ringing, Answered, Failed, Cancelled, Ended] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_call_id_file_stem() {
        assert_eq!(CallId::from("a1b2@10.0.0.1:5060").file_stem(), "a1b2_10.0.0.1_5060");
    }

    #[test]
    fn test_record_duration_uses_answer_time() {
        let mut record = CallRecord::new("c1".into(), CallDirection::Inbound, "a", "b");
        let answered = Utc::now();
        record.answered_at = Some(answered);
        record.mark_ended(CallRecordStatus::Ended, answered + chrono::Duration::seconds(42));
        assert_eq!(record.duration_secs, Some(42));
    }
}
