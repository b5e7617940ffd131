//! Database migrations for the ads connectors service.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_provider_credentials;
mod m2025_01_10_000002_create_sync_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_provider_credentials::Migration),
            Box::new(m2025_01_10_000002_create_sync_jobs::Migration),
        ]
    }
}
