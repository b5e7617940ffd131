//! # SyncJob Repository
//!
//! [`SyncJobQueue`] backed by the sync_jobs table. Rows are inserted as
//! `queued`; workers outside this service claim them.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::error::IntegrationError;
use crate::models::credential::CredentialKey;
use crate::models::sync_job::{ActiveModel, Column, Entity, Model, SyncJobRequest};
use crate::repositories::credential::store_error;
use crate::store::SyncJobQueue;

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Jobs for one binding, oldest first.
    pub async fn list_for(&self, key: &CredentialKey) -> Result<Vec<Model>, IntegrationError> {
        let mut query = Entity::find()
            .filter(Column::UserId.eq(key.user_id.as_str()))
            .filter(Column::Provider.eq(key.provider.as_str()))
            .order_by_asc(Column::CreatedAt);
        query = match &key.workspace_client_id {
            Some(workspace) => query.filter(Column::WorkspaceClientId.eq(workspace.as_str())),
            None => query.filter(Column::WorkspaceClientId.is_null()),
        };
        query
            .all(&self.db)
            .await
            .map_err(store_error("Failed to list sync jobs"))
    }
}

#[async_trait]
impl SyncJobQueue for SyncJobRepository {
    async fn enqueue(&self, request: SyncJobRequest) -> Result<(), IntegrationError> {
        let now = Utc::now().fixed_offset();
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(request.user_id.clone()),
            provider: Set(request.provider.as_str().to_string()),
            workspace_client_id: Set(request.workspace_client_id.clone()),
            job_type: Set(request.job_type.as_str().to_string()),
            status: Set("queued".to_string()),
            attempts: Set(0),
            scheduled_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = job
            .insert(&self.db)
            .await
            .map_err(store_error("Failed to create sync job"))?;

        tracing::info!(
            user_id = %result.user_id,
            provider = %result.provider,
            job_type = %result.job_type,
            job_id = %result.id,
            "Sync job enqueued"
        );
        Ok(())
    }
}
