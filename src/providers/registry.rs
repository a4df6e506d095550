//! Provider registry
//!
//! Holds the configured provider adapters. The registry is constructed at
//! startup from [`AppConfig`] and passed around through application state;
//! it is the single source of truth for which providers exist.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::providers::{EldProvider, ProviderMetadata, motive::MotiveProvider, samsara::SamsaraProvider};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{slug}' not found")]
    ProviderNotFound { slug: String },
}

/// Registry of provider adapters keyed by slug.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn EldProvider>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Build the registry from application configuration.
    ///
    /// Providers without OAuth credentials are still registered in dev
    /// profiles so local work and tests can exercise the API surface.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        let samsara = SamsaraProvider::new(
            config.samsara_client_id.clone().unwrap_or_default(),
            config.samsara_client_secret.clone().unwrap_or_default(),
            config.samsara_oauth_base.clone(),
            config.samsara_api_base.clone(),
            config.provider_timeout_seconds,
        );
        registry.register(Arc::new(samsara));

        let motive = MotiveProvider::new(
            config.motive_client_id.clone().unwrap_or_default(),
            config.motive_client_secret.clone().unwrap_or_default(),
            config.motive_oauth_base.clone(),
            config.motive_api_base.clone(),
            config.provider_timeout_seconds,
        );
        registry.register(Arc::new(motive));

        registry
    }

    /// Register a provider adapter under its metadata slug.
    pub fn register(&mut self, provider: Arc<dyn EldProvider>) {
        let slug = provider.metadata().slug;
        self.providers.insert(slug, provider);
    }

    /// Get a provider adapter by slug.
    pub fn get(&self, slug: &str) -> Result<Arc<dyn EldProvider>, RegistryError> {
        self.providers
            .get(slug)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound {
                slug: slug.to_string(),
            })
    }

    /// True when the slug names a registered provider.
    pub fn contains(&self, slug: &str) -> bool {
        self.providers.contains_key(slug)
    }

    /// Metadata for all providers, sorted by slug for stable ordering.
    pub fn list_metadata(&self) -> Vec<ProviderMetadata> {
        let mut metadata: Vec<_> = self
            .providers
            .values()
            .map(|provider| provider.metadata())
            .collect();
        metadata.sort_by(|a, b| a.slug.cmp(&b.slug));
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        AuthorizeParams, DriverRecord, EldProvider, ExchangeCodeParams, FaultRecord, HosLogRecord,
        IftaRecord, LocationRecord, ProviderError, TokenGrant, VehicleRecord,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use url::Url;

    struct TestProvider {
        slug: &'static str,
    }

    #[async_trait]
    impl EldProvider for TestProvider {
        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata {
                slug: self.slug.to_string(),
                display_name: self.slug.to_string(),
                webhooks: false,
            }
        }

        fn authorize_url(&self, _params: AuthorizeParams) -> Result<Url, ProviderError> {
            Ok(Url::parse("https://example.com/oauth/authorize").unwrap())
        }

        async fn exchange_code(
            &self,
            _params: ExchangeCodeParams,
        ) -> Result<TokenGrant, ProviderError> {
            Ok(TokenGrant {
                access_token: "token".to_string(),
                refresh_token: None,
                external_id: None,
            })
        }

        async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant, ProviderError> {
            Err(ProviderError::Unknown {
                details: "not implemented".to_string(),
            })
        }

        async fn fetch_vehicles(
            &self,
            _access_token: &str,
        ) -> Result<Vec<VehicleRecord>, ProviderError> {
            Ok(vec![])
        }

        async fn fetch_drivers(
            &self,
            _access_token: &str,
        ) -> Result<Vec<DriverRecord>, ProviderError> {
            Ok(vec![])
        }

        async fn fetch_hos_logs(
            &self,
            _access_token: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<HosLogRecord>, ProviderError> {
            Ok(vec![])
        }

        async fn fetch_vehicle_locations(
            &self,
            _access_token: &str,
        ) -> Result<Vec<LocationRecord>, ProviderError> {
            Ok(vec![])
        }

        async fn fetch_fault_codes(
            &self,
            _access_token: &str,
        ) -> Result<Vec<FaultRecord>, ProviderError> {
            Ok(vec![])
        }

        async fn fetch_ifta_mileage(
            &self,
            _access_token: &str,
            _period_month: &str,
        ) -> Result<Vec<IftaRecord>, ProviderError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_registry_unknown_provider() {
        let registry = ProviderRegistry::new();

        let result = registry.get("unknown");
        assert!(result.is_err());
        if let Err(RegistryError::ProviderNotFound { slug }) = result {
            assert_eq!(slug, "unknown");
        } else {
            panic!("Expected ProviderNotFound error");
        }
        assert!(!registry.contains("unknown"));
    }

    #[test]
    fn test_registry_known_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TestProvider { slug: "test" }));

        assert!(registry.contains("test"));
        let provider = registry.get("test").unwrap();
        assert_eq!(provider.metadata().slug, "test");
    }

    #[test]
    fn test_registry_list_ordering() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TestProvider { slug: "zebra" }));
        registry.register(Arc::new(TestProvider { slug: "apple" }));
        registry.register(Arc::new(TestProvider { slug: "banana" }));

        let metadata = registry.list_metadata();
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata[0].slug, "apple");
        assert_eq!(metadata[1].slug, "banana");
        assert_eq!(metadata[2].slug, "zebra");
    }

    #[test]
    fn test_registry_from_config_registers_builtins() {
        let config = crate::config::AppConfig::default();
        let registry = ProviderRegistry::from_config(&config);

        assert!(registry.contains("samsara"));
        assert!(registry.contains("motive"));
    }
}
