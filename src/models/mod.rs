//! # Data Models
//!
//! Domain types of the integration layer plus the SeaORM entities backing
//! the credential store and sync job queue adapters.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod credential;
pub mod metrics;
pub mod provider;
pub mod provider_credential;
pub mod sync_job;

pub use provider_credential::Entity as ProviderCredentialEntity;
pub use sync_job::Entity as SyncJob;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "ads-connectors".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
