//! Provider metadata types
//!
//! Describes each platform for the `/providers` listing.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::ProviderOAuthConfig;
use crate::oauth::authorize::uses_pkce;
use crate::models::provider::ProviderId;

/// Metadata about a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProviderMetadata {
    pub provider: ProviderId,
    pub display_name: String,
    /// OAuth scopes requested at authorization time
    pub scopes: Vec<String>,
    /// Whether the authorization request carries a PKCE challenge
    pub pkce: bool,
    /// Whether client credentials are configured for this deployment
    pub configured: bool,
}

impl ProviderMetadata {
    pub fn for_provider(provider: ProviderId, config: &ProviderOAuthConfig) -> Self {
        Self {
            provider,
            display_name: provider.display_name().to_string(),
            scopes: config.scopes.clone(),
            pkce: uses_pkce(provider),
            configured: config.client_credentials().is_some(),
        }
    }
}
