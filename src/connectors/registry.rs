//! Adapter registry
//!
//! Explicitly constructed map from provider to adapter. Callers own the
//! registry and hand it to the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::connectors::metadata::ProviderMetadata;
use crate::connectors::{
    AdPlatformAdapter, GoogleAdsAdapter, LinkedinAdsAdapter, MetaAdsAdapter, TiktokAdsAdapter,
};
use crate::error::IntegrationError;
use crate::models::provider::ProviderId;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderId, Arc<dyn AdPlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four platform adapters, sharing one HTTP client.
    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GoogleAdsAdapter::from_config(config, http.clone())));
        registry.register(Arc::new(MetaAdsAdapter::from_config(config, http.clone())));
        registry.register(Arc::new(TiktokAdsAdapter::from_config(config, http.clone())));
        registry.register(Arc::new(LinkedinAdsAdapter::from_config(config, http)));
        registry
    }

    /// Register an adapter under its own provider id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn AdPlatformAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<dyn AdPlatformAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn require(&self, provider: ProviderId) -> Result<Arc<dyn AdPlatformAdapter>, IntegrationError> {
        self.get(provider)
            .ok_or_else(|| IntegrationError::UnknownProvider(provider.to_string()))
    }

    /// Registered providers, sorted for stable output.
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<_> = self.adapters.keys().copied().collect();
        providers.sort();
        providers
    }

    /// Metadata for every registered provider, combined with whether the
    /// deployment has OAuth client credentials for it.
    pub fn list_metadata(&self, config: &AppConfig) -> Vec<ProviderMetadata> {
        self.providers()
            .into_iter()
            .map(|provider| ProviderMetadata::for_provider(provider, config.provider(provider)))
            .collect()
    }
}
