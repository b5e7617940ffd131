//! SyncJob entity model and the enqueue request that produces rows in it.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::provider::ProviderId;

/// Queued unit of sync work for one provider binding
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: String,

    pub provider: String,

    pub workspace_client_id: Option<String>,

    /// initial-backfill | incremental
    pub job_type: String,

    /// queued | running | succeeded | failed
    pub status: String,

    pub attempts: i32,

    pub scheduled_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SyncJobType {
    InitialBackfill,
    Incremental,
}

impl SyncJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobType::InitialBackfill => "initial-backfill",
            SyncJobType::Incremental => "incremental",
        }
    }
}

/// Fire-and-forget request for background sync work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncJobRequest {
    pub user_id: String,
    pub provider: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_client_id: Option<String>,
    pub job_type: SyncJobType,
}
