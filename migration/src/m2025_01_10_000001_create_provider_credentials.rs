//! Migration to create the provider_credentials table.
//!
//! One row per (user, provider, workspace) binding. Tokens are stored as
//! AES-256-GCM ciphertext; `credential_key` carries the unique binding.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProviderCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProviderCredentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::CredentialKey)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ProviderCredentials::UserId).text().not_null())
                    .col(ColumnDef::new(ProviderCredentials::Provider).text().not_null())
                    .col(
                        ColumnDef::new(ProviderCredentials::WorkspaceClientId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(ColumnDef::new(ProviderCredentials::Scopes).json_binary().null())
                    .col(
                        ColumnDef::new(ProviderCredentials::BoundAccountId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::AccessTokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::RefreshTokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Refresh service scans by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_provider_credentials_access_expires_at")
                    .table(ProviderCredentials::Table)
                    .col(ProviderCredentials::AccessTokenExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_provider_credentials_user_provider")
                    .table(ProviderCredentials::Table)
                    .col(ProviderCredentials::UserId)
                    .col(ProviderCredentials::Provider)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_provider_credentials_access_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_provider_credentials_user_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ProviderCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProviderCredentials {
    Table,
    Id,
    CredentialKey,
    UserId,
    Provider,
    WorkspaceClientId,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    Scopes,
    BoundAccountId,
    AccessTokenExpiresAt,
    RefreshTokenExpiresAt,
    CreatedAt,
    UpdatedAt,
}
