//! Which calls the AI attendant handles, and how.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One keyword rule; matched case-insensitively as a substring of the recognized text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub reply: String,
}

/// Per-called-user behaviour of the conversational orchestrator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationProfile {
    /// Checked in order before anything else
    pub keywords: Vec<KeywordRule>,
    /// Ask the response generator when no keyword matches
    pub free_form: bool,
    pub fallback_message: Option<String>,
    /// Spoken as soon as the call is answered
    pub opening_line: Option<String>,
    /// Record both sides and offer a message phase after two turns
    pub recording: bool,
    /// System instructions passed to the response generator
    pub instructions: Option<String>,
}

impl AutomationProfile {
    /// First keyword rule whose keyword occurs in `text`
    pub fn keyword_reply(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .find(|rule| !rule.keyword.is_empty() && text.contains(&rule.keyword.to_lowercase()))
            .map(|rule| rule.reply.as_str())
    }
}

/// Decides whether a called identity is automated and resolves its profile
#[async_trait]
pub trait AutomationPolicy: Send + Sync {
    async fn is_automated(&self, called_user: &str) -> bool;

    async fn resolve_profile(&self, called_user: &str) -> Option<Arc<AutomationProfile>>;
}

/// Policy backed by the `[automation]` configuration section
#[derive(Debug, Default)]
pub struct StaticAutomationPolicy {
    automated: HashSet<String>,
    profiles: HashMap<String, Arc<AutomationProfile>>,
}

impl StaticAutomationPolicy {
    pub fn new(automated_users: impl IntoIterator<Item = String>, profiles: HashMap<String, AutomationProfile>) -> Self {
        let profiles: HashMap<_, _> = profiles.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
        let mut automated: HashSet<String> = automated_users.into_iter().collect();
        automated.extend(profiles.keys().cloned());
        Self { automated, profiles }
    }

    /// Policy that never automates
    pub fn disabled() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AutomationPolicy for StaticAutomationPolicy {
    async fn is_automated(&self, called_user: &str) -> bool {
        self.automated.contains(called_user)
    }

    async fn resolve_profile(&self, called_user: &str) -> Option<Arc<AutomationProfile>> {
        self.profiles.get(called_user).cloned()
    }
}
