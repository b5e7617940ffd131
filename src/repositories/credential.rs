//! Credential repository
//!
//! SeaORM-backed [`CredentialStore`]. Access and refresh tokens are sealed
//! with AES-256-GCM and bound to the row's `credential_key`, so a ciphertext
//! copied onto another binding fails to open.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use crate::crypto::{CryptoKey, open_secret, seal_secret};
use crate::error::IntegrationError;
use crate::models::credential::{CredentialKey, ProviderCredential};
use crate::models::provider_credential::{ActiveModel, Column, Entity, Model};
use crate::store::CredentialStore;

/// Repository for provider credential rows
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    db: DatabaseConnection,
    crypto_key: CryptoKey,
}

pub(crate) fn store_error(context: &'static str) -> impl FnOnce(DbErr) -> IntegrationError {
    move |e| {
        tracing::error!(error = %e, "{context}");
        IntegrationError::Store(format!("{context}: {e}"))
    }
}

impl CredentialRepository {
    pub fn new(db: DatabaseConnection, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    async fn find_row(&self, key: &CredentialKey) -> Result<Option<Model>, IntegrationError> {
        Entity::find()
            .filter(Column::CredentialKey.eq(key.aad()))
            .one(&self.db)
            .await
            .map_err(store_error("Failed to load provider credential"))
    }

    fn decode(&self, row: Model) -> Result<ProviderCredential, IntegrationError> {
        let provider = row.provider.parse()?;
        let key = CredentialKey::new(row.user_id.clone(), provider, row.workspace_client_id.clone());

        let opened = open_secret(&self.crypto_key, &key, &row.access_token_ciphertext).and_then(
            |access| {
                let refresh = row
                    .refresh_token_ciphertext
                    .as_deref()
                    .map(|ct| open_secret(&self.crypto_key, &key, ct))
                    .transpose()?;
                Ok((access, refresh))
            },
        );
        let (access_token, refresh_token) = opened.map_err(|e| {
            // No token material in logs, only the binding.
            tracing::error!(credential = %key, "Token decryption failed");
            IntegrationError::Crypto(e)
        })?;

        let scopes: BTreeSet<String> = row
            .scopes
            .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
            .unwrap_or_default()
            .into_iter()
            .collect();

        Ok(ProviderCredential {
            user_id: row.user_id,
            provider,
            workspace_client_id: row.workspace_client_id,
            access_token,
            refresh_token,
            scopes,
            bound_account_id: row.bound_account_id,
            access_token_expires_at: row.access_token_expires_at.map(|at| at.with_timezone(&Utc)),
            refresh_token_expires_at: row.refresh_token_expires_at.map(|at| at.with_timezone(&Utc)),
        })
    }
}

#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn persist(&self, credential: &ProviderCredential) -> Result<(), IntegrationError> {
        let key = credential.key();
        let access = seal_secret(&self.crypto_key, &key, &credential.access_token)?;
        let refresh = credential
            .refresh_token
            .as_ref()
            .map(|token| seal_secret(&self.crypto_key, &key, token))
            .transpose()?;
        let scopes = serde_json::to_value(credential.scopes.iter().collect::<Vec<_>>())
            .map_err(|e| IntegrationError::Store(format!("Failed to encode scopes: {e}")))?;
        let now = Utc::now().fixed_offset();

        let existing = self.find_row(&key).await?;
        let is_new = existing.is_none();
        let mut row = match existing {
            Some(existing) => ActiveModel::from(existing),
            None => ActiveModel {
                id: Set(Uuid::new_v4()),
                credential_key: Set(key.aad()),
                user_id: Set(credential.user_id.clone()),
                provider: Set(credential.provider.as_str().to_string()),
                workspace_client_id: Set(credential.workspace_client_id.clone()),
                created_at: Set(now),
                ..Default::default()
            },
        };

        row.access_token_ciphertext = Set(access);
        row.refresh_token_ciphertext = Set(refresh);
        row.scopes = Set(Some(scopes));
        row.bound_account_id = Set(credential.bound_account_id.clone());
        row.access_token_expires_at = Set(credential.access_token_expires_at.map(|at| at.fixed_offset()));
        row.refresh_token_expires_at =
            Set(credential.refresh_token_expires_at.map(|at| at.fixed_offset()));
        row.updated_at = Set(now);

        if is_new {
            row.insert(&self.db)
                .await
                .map_err(store_error("Failed to insert provider credential"))?;
        } else {
            row.update(&self.db)
                .await
                .map_err(store_error("Failed to update provider credential"))?;
        }

        tracing::debug!(credential = %key, created = is_new, "Provider credential persisted");
        Ok(())
    }

    async fn get(&self, key: &CredentialKey) -> Result<Option<ProviderCredential>, IntegrationError> {
        self.find_row(key).await?.map(|row| self.decode(row)).transpose()
    }

    async fn delete(&self, key: &CredentialKey) -> Result<bool, IntegrationError> {
        let result = Entity::delete_many()
            .filter(Column::CredentialKey.eq(key.aad()))
            .exec(&self.db)
            .await
            .map_err(store_error("Failed to delete provider credential"))?;
        Ok(result.rows_affected > 0)
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ProviderCredential>, IntegrationError> {
        let rows = Entity::find()
            .filter(Column::AccessTokenExpiresAt.lte(before.fixed_offset()))
            .order_by_asc(Column::AccessTokenExpiresAt)
            .all(&self.db)
            .await
            .map_err(store_error("Failed to list expiring credentials"))?;

        let mut credentials = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.credential_key.clone();
            // One undecryptable row must not stall refresh for the others.
            match self.decode(row) {
                Ok(credential) => credentials.push(credential),
                Err(e) => tracing::warn!(credential_key = %key, error = %e, "Skipping unreadable credential"),
            }
        }
        Ok(credentials)
    }
}
