//! Directory and call-history contracts, with in-memory implementations.
//!
//! Call handling never waits on these for correctness: callers log failures
//! and carry on (see [`persist_call`]).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use crate::error::Result;
use crate::types::{CallId, CallRecord, UserRecord};

/// User directory consulted by registration
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>>;

    async fn save_user(&self, user: UserRecord) -> Result<()>;
}

/// Call history
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn find_call(&self, call_id: &CallId) -> Result<Option<CallRecord>>;

    async fn save_call(&self, record: CallRecord) -> Result<()>;
}

/// In-memory user directory
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    users: Arc<DashMap<String, UserRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated with the given users
    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.users.insert(user.username.clone(), user);
        }
        directory
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.get(username).map(|entry| entry.clone()))
    }

    async fn save_user(&self, user: UserRecord) -> Result<()> {
        self.users.insert(user.username.clone(), user);
        Ok(())
    }
}

/// In-memory call history
#[derive(Debug, Default, Clone)]
pub struct InMemoryCallStore {
    calls: Arc<DashMap<CallId, CallRecord>>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.calls.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn find_call(&self, call_id: &CallId) -> Result<Option<CallRecord>> {
        Ok(self.calls.get(call_id).map(|entry| entry.clone()))
    }

    async fn save_call(&self, record: CallRecord) -> Result<()> {
        self.calls.insert(record.call_id.clone(), record);
        Ok(())
    }
}

/// Loads the call record, applies `update` and saves it back.
///
/// A missing record or a store failure is logged and ignored.
pub async fn persist_call<F>(store: &dyn CallStore, call_id: &CallId, update: F)
where
    F: FnOnce(&mut CallRecord) + Send,
{
    let mut record = match store.find_call(call_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(call_id = %call_id, "No call record to update");
            return;
        }
        Err(e) => {
            warn!(call_id = %call_id, "Call store lookup failed: {}", e);
            return;
        }
    };
    update(&mut record);
    if let Err(e) = store.save_call(record).await {
        warn!(call_id = %call_id, "Call store save failed: {}", e);
    }
}

/// Saves a new call record, logging failures
pub async fn save_new_call(store: &dyn CallStore, record: CallRecord) {
    let call_id = record.call_id.clone();
    if let Err(e) = store.save_call(record).await {
        warn!(call_id = %call_id, "Call store save failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallEngineError;
    use crate::types::{CallDirection, CallRecordStatus};

    struct FailingStore;

    #[async_trait]
    impl CallStore for FailingStore {
        async fn find_call(&self, _call_id: &CallId) -> Result<Option<CallRecord>> {
            Err(CallEngineError::store("offline"))
        }

        async fn save_call(&self, _record: CallRecord) -> Result<()> {
            Err(CallEngineError::store("offline"))
        }
    }

    #[tokio::test]
    async fn test_persist_call_updates_existing_record() {
        let store = InMemoryCallStore::new();
        let id = CallId::from("c1");
        save_new_call(&store, CallRecord::new(id.clone(), CallDirection::Inbound, "a", "b")).await;

        persist_call(&store, &id, |r| r.status = CallRecordStatus::Answered).await;
        let record = store.find_call(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CallRecordStatus::Answered);
    }

    #[tokio::test]
    async fn test_store_failures_are_absorbed() {
        let id = CallId::from("c2");
        save_new_call(&FailingStore, CallRecord::new(id.clone(), CallDirection::Outbound, "a", "b")).await;
        persist_call(&FailingStore, &id, |r| r.status = CallRecordStatus::Ended).await;
    }

    #[tokio::test]
    async fn test_directory_lookup() {
        let mut disabled = UserRecord::new("200");
        disabled.enabled = false;
        let directory = InMemoryDirectory::with_users([UserRecord::new("100"), disabled]);
        assert!(directory.find_user("100").await.unwrap().unwrap().enabled);
        assert!(!directory.find_user("200").await.unwrap().unwrap().enabled);
        assert!(directory.find_user("300").await.unwrap().is_none());
    }
}
