//! ProviderCredential entity model
//!
//! SeaORM entity for the provider_credentials table. Token columns hold
//! AES-256-GCM ciphertext bound to `credential_key`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "provider_credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// `user|provider|workspace`, unique per binding
    #[sea_orm(unique)]
    pub credential_key: String,

    pub user_id: String,

    pub provider: String,

    pub workspace_client_id: Option<String>,

    pub access_token_ciphertext: Vec<u8>,

    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Granted scopes as a JSON array
    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: Option<JsonValue>,

    pub bound_account_id: Option<String>,

    pub access_token_expires_at: Option<DateTimeWithTimeZone>,

    pub refresh_token_expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
