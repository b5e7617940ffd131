//! Collaborator seams for credential persistence and sync-job enqueueing.
//!
//! The integration layer only reads and writes credentials through
//! [`CredentialStore`], and only hands work to the background syncer through
//! [`SyncJobQueue`]. SeaORM-backed implementations live in
//! [`crate::repositories`]; the in-memory ones here serve tests and the local
//! profile.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IntegrationError;
use crate::models::credential::{CredentialKey, ProviderCredential};
use crate::models::sync_job::SyncJobRequest;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the credential for its key.
    async fn persist(&self, credential: &ProviderCredential) -> Result<(), IntegrationError>;

    async fn get(&self, key: &CredentialKey) -> Result<Option<ProviderCredential>, IntegrationError>;

    /// Remove the credential. Returns whether anything was removed.
    async fn delete(&self, key: &CredentialKey) -> Result<bool, IntegrationError>;

    /// Credentials whose access token expires at or before `before`.
    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ProviderCredential>, IntegrationError>;
}

#[async_trait]
pub trait SyncJobQueue: Send + Sync {
    async fn enqueue(&self, request: SyncJobRequest) -> Result<(), IntegrationError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    entries: Mutex<HashMap<CredentialKey, ProviderCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CredentialKey, ProviderCredential>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn persist(&self, credential: &ProviderCredential) -> Result<(), IntegrationError> {
        self.lock().insert(credential.key(), credential.clone());
        Ok(())
    }

    async fn get(&self, key: &CredentialKey) -> Result<Option<ProviderCredential>, IntegrationError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn delete(&self, key: &CredentialKey) -> Result<bool, IntegrationError> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ProviderCredential>, IntegrationError> {
        let mut expiring: Vec<_> = self
            .lock()
            .values()
            .filter(|c| c.access_token_expires_at.is_some_and(|at| at <= before))
            .cloned()
            .collect();
        expiring.sort_by_key(|c| c.access_token_expires_at);
        Ok(expiring)
    }
}

/// Records enqueued requests in order.
#[derive(Debug, Default)]
pub struct InMemorySyncJobQueue {
    jobs: Mutex<Vec<SyncJobRequest>>,
}

impl InMemorySyncJobQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn jobs(&self) -> Vec<SyncJobRequest> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl SyncJobQueue for InMemorySyncJobQueue {
    async fn enqueue(&self, request: SyncJobRequest) -> Result<(), IntegrationError> {
        self.jobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);
        Ok(())
    }
}
