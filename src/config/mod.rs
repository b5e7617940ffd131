//! Configuration loading for the ads connectors service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ADS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr};

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::provider::ProviderId;

const ENV_PREFIX: &str = "ADS_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `ADS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// AES-256 key for stored provider tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// AES-256 key for OAuth state. Falls back to `crypto_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<Vec<u8>>,
    /// Public base URL providers redirect back to (`{base}/callback/{provider}`).
    #[serde(default = "default_oauth_redirect_base")]
    pub oauth_redirect_base: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub token_refresh: TokenRefreshConfig,
    pub google: ProviderOAuthConfig,
    pub meta: ProviderOAuthConfig,
    pub tiktok: ProviderOAuthConfig,
    pub linkedin: ProviderOAuthConfig,
    /// Required by the Google Ads API on every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_developer_token: Option<String>,
}

/// Outbound HTTP client settings shared by token exchange and adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_http_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Upper bound for caller-driven transport retries
    #[serde(default = "default_http_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_http_retry_base_ms")]
    pub retry_base_ms: u64,
}

/// Metric aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FetchConfig {
    /// Concurrent account fetches allowed per provider
    #[serde(default = "default_fetch_concurrency_per_provider")]
    pub concurrency_per_provider: usize,
    /// Hard stop for provider pagination
    #[serde(default = "default_fetch_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_fetch_page_size")]
    pub page_size: u32,
}

/// Token refresh service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRefreshConfig {
    /// Background refresh interval in seconds (default: 300)
    #[serde(default = "default_token_refresh_tick_seconds")]
    pub tick_seconds: u64,

    /// Lead time before expiry to trigger refresh in seconds (default: 600)
    #[serde(default = "default_token_refresh_lead_time_seconds")]
    pub lead_time_seconds: u64,

    /// Maximum number of concurrent refresh operations (default: 4)
    #[serde(default = "default_token_refresh_concurrency")]
    pub concurrency: u32,

    /// Jitter factor to avoid thundering herd (default: 0.1)
    #[serde(default = "default_token_refresh_jitter_factor")]
    pub jitter_factor: f64,
}

/// OAuth client and endpoint settings for one advertising platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProviderOAuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    /// Host serving the user-facing consent screen
    pub oauth_base: String,
    /// Host serving the token endpoint
    pub token_base: String,
    /// Host serving the reporting API
    pub api_base: String,
}

impl ProviderOAuthConfig {
    /// Public defaults for each platform; client credentials stay unset.
    pub fn defaults_for(provider: ProviderId) -> Self {
        let (scopes, oauth_base, token_base, api_base): (&[&str], &str, &str, &str) =
            match provider {
                ProviderId::Google => (
                    &["https://www.googleapis.com/auth/adwords"],
                    "https://accounts.google.com",
                    "https://oauth2.googleapis.com",
                    "https://googleads.googleapis.com",
                ),
                ProviderId::Meta => (
                    &["ads_read", "ads_management", "business_management"],
                    "https://www.facebook.com",
                    "https://graph.facebook.com",
                    "https://graph.facebook.com",
                ),
                ProviderId::Tiktok => (
                    &["ad.manage", "ad.read", "report.advertiser"],
                    "https://business-api.tiktok.com",
                    "https://business-api.tiktok.com",
                    "https://business-api.tiktok.com",
                ),
                ProviderId::Linkedin => (
                    &["r_ads", "r_ads_reporting", "r_organization_admin"],
                    "https://www.linkedin.com",
                    "https://www.linkedin.com",
                    "https://api.linkedin.com",
                ),
            };

        Self {
            client_id: None,
            client_secret: None,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            oauth_base: oauth_base.to_string(),
            token_base: token_base.to_string(),
            api_base: api_base.to_string(),
        }
    }

    /// Client id and secret, when both are configured and non-empty.
    pub fn client_credentials(&self) -> Option<(&str, &str)> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        }
    }
}

impl TokenRefreshConfig {
    /// Validate token refresh configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds < 30 {
            return Err(ConfigError::InvalidTokenRefreshTickInterval {
                value: self.tick_seconds,
            });
        }

        if self.lead_time_seconds < 60 || self.lead_time_seconds > 86400 {
            return Err(ConfigError::InvalidTokenRefreshLeadTime {
                value: self.lead_time_seconds,
            });
        }

        if self.concurrency == 0 || self.concurrency > 20 {
            return Err(ConfigError::InvalidTokenRefreshConcurrency {
                value: self.concurrency,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidTokenRefreshJitter {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.timeout_ms.min(self.connect_timeout_ms),
            });
        }
        if self.max_retries > 10 {
            return Err(ConfigError::InvalidHttpRetries {
                value: self.max_retries,
            });
        }
        Ok(())
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_per_provider == 0 || self.concurrency_per_provider > 64 {
            return Err(ConfigError::InvalidFetchConcurrency {
                value: self.concurrency_per_provider,
            });
        }
        if self.max_pages == 0 {
            return Err(ConfigError::InvalidFetchMaxPages);
        }
        if self.page_size == 0 || self.page_size > 1000 {
            return Err(ConfigError::InvalidFetchPageSize {
                value: self.page_size,
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            state_key: None,
            oauth_redirect_base: default_oauth_redirect_base(),
            http: HttpConfig::default(),
            fetch: FetchConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
            google: ProviderOAuthConfig::defaults_for(ProviderId::Google),
            meta: ProviderOAuthConfig::defaults_for(ProviderId::Meta),
            tiktok: ProviderOAuthConfig::defaults_for(ProviderId::Tiktok),
            linkedin: ProviderOAuthConfig::defaults_for(ProviderId::Linkedin),
            google_developer_token: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            connect_timeout_ms: default_http_connect_timeout_ms(),
            max_retries: default_http_max_retries(),
            retry_base_ms: default_http_retry_base_ms(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency_per_provider: default_fetch_concurrency_per_provider(),
            max_pages: default_fetch_max_pages(),
            page_size: default_fetch_page_size(),
        }
    }
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_token_refresh_tick_seconds(),
            lead_time_seconds: default_token_refresh_lead_time_seconds(),
            concurrency: default_token_refresh_concurrency(),
            jitter_factor: default_token_refresh_jitter_factor(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    pub fn provider(&self, provider: ProviderId) -> &ProviderOAuthConfig {
        match provider {
            ProviderId::Google => &self.google,
            ProviderId::Meta => &self.meta,
            ProviderId::Tiktok => &self.tiktok,
            ProviderId::Linkedin => &self.linkedin,
        }
    }

    /// Key sealing OAuth state, falling back to the credential key.
    pub fn effective_state_key(&self) -> Option<&[u8]> {
        self.state_key.as_deref().or(self.crypto_key.as_deref())
    }

    /// Callback URL registered with the provider.
    pub fn redirect_uri(&self, provider: ProviderId) -> String {
        format!(
            "{}/callback/{}",
            self.oauth_redirect_base.trim_end_matches('/'),
            provider
        )
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        if config.state_key.is_some() {
            config.state_key = Some(REDACTED.as_bytes().to_vec());
        }
        if config.google_developer_token.is_some() {
            config.google_developer_token = Some(REDACTED.to_string());
        }
        for provider in [
            &mut config.google,
            &mut config.meta,
            &mut config.tiktok,
            &mut config.linkedin,
        ] {
            if provider.client_secret.is_some() {
                provider.client_secret = Some(REDACTED.to_string());
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key.as_ref() {
            Some(key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if let Some(key) = self.state_key.as_ref()
            && key.len() != 32
        {
            return Err(ConfigError::InvalidStateKeyLength { length: key.len() });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        url::Url::parse(&self.oauth_redirect_base).map_err(|source| {
            ConfigError::InvalidRedirectBase {
                value: self.oauth_redirect_base.clone(),
                source,
            }
        })?;

        self.http.validate()?;
        self.fetch.validate()?;
        self.token_refresh.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://ads-connectors.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_oauth_redirect_base() -> String {
    "http://localhost:8080".to_string()
}

fn default_http_timeout_ms() -> u64 {
    15_000
}

fn default_http_connect_timeout_ms() -> u64 {
    5_000
}

fn default_http_max_retries() -> u32 {
    3
}

fn default_http_retry_base_ms() -> u64 {
    250
}

fn default_fetch_concurrency_per_provider() -> usize {
    4
}

fn default_fetch_max_pages() -> u32 {
    50
}

fn default_fetch_page_size() -> u32 {
    500
}

fn default_token_refresh_tick_seconds() -> u64 {
    300 // 5 minutes
}

fn default_token_refresh_lead_time_seconds() -> u64 {
    600 // 10 minutes
}

fn default_token_refresh_concurrency() -> u32 {
    4
}

fn default_token_refresh_jitter_factor() -> f64 {
    0.1
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("crypto key is missing; set ADS_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("{name} is invalid base64: {error}")]
    InvalidKeyBase64 { name: &'static str, error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("state key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidStateKeyLength { length: usize },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("oauth redirect base '{value}' is not a valid URL: {source}")]
    InvalidRedirectBase {
        value: String,
        source: url::ParseError,
    },
    #[error("http timeouts must be positive, got {value}ms")]
    InvalidHttpTimeout { value: u64 },
    #[error("http max retries must be at most 10, got {value}")]
    InvalidHttpRetries { value: u32 },
    #[error("fetch concurrency per provider must be between 1 and 64, got {value}")]
    InvalidFetchConcurrency { value: usize },
    #[error("fetch max pages must be at least 1")]
    InvalidFetchMaxPages,
    #[error("fetch page size must be between 1 and 1000, got {value}")]
    InvalidFetchPageSize { value: u32 },
    #[error("token refresh tick interval must be at least 30 seconds, got {value}")]
    InvalidTokenRefreshTickInterval { value: u64 },
    #[error("token refresh lead time must be between 60 and 86400 seconds, got {value}")]
    InvalidTokenRefreshLeadTime { value: u64 },
    #[error("token refresh concurrency must be between 1 and 20, got {value}")]
    InvalidTokenRefreshConcurrency { value: u32 },
    #[error("token refresh jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidTokenRefreshJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `ADS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let crypto_key = take_key(&mut layered, "CRYPTO_KEY", "crypto key")?;
        let state_key = take_key(&mut layered, "STATE_KEY", "state key")?;
        let oauth_redirect_base = take_string(&mut layered, "OAUTH_REDIRECT_BASE")
            .unwrap_or_else(default_oauth_redirect_base);

        let http = HttpConfig {
            timeout_ms: take_parsed(&mut layered, "HTTP_TIMEOUT_MS")
                .unwrap_or_else(default_http_timeout_ms),
            connect_timeout_ms: take_parsed(&mut layered, "HTTP_CONNECT_TIMEOUT_MS")
                .unwrap_or_else(default_http_connect_timeout_ms),
            max_retries: take_parsed(&mut layered, "HTTP_MAX_RETRIES")
                .unwrap_or_else(default_http_max_retries),
            retry_base_ms: take_parsed(&mut layered, "HTTP_RETRY_BASE_MS")
                .unwrap_or_else(default_http_retry_base_ms),
        };

        let fetch = FetchConfig {
            concurrency_per_provider: take_parsed(&mut layered, "FETCH_CONCURRENCY_PER_PROVIDER")
                .unwrap_or_else(default_fetch_concurrency_per_provider),
            max_pages: take_parsed(&mut layered, "FETCH_MAX_PAGES")
                .unwrap_or_else(default_fetch_max_pages),
            page_size: take_parsed(&mut layered, "FETCH_PAGE_SIZE")
                .unwrap_or_else(default_fetch_page_size),
        };

        let token_refresh = TokenRefreshConfig {
            tick_seconds: take_parsed(&mut layered, "TOKEN_REFRESH_TICK_SECONDS")
                .unwrap_or_else(default_token_refresh_tick_seconds),
            lead_time_seconds: take_parsed(&mut layered, "TOKEN_REFRESH_LEAD_TIME_SECONDS")
                .unwrap_or_else(default_token_refresh_lead_time_seconds),
            concurrency: take_parsed(&mut layered, "TOKEN_REFRESH_CONCURRENCY")
                .unwrap_or_else(default_token_refresh_concurrency),
            jitter_factor: take_parsed(&mut layered, "TOKEN_REFRESH_JITTER_FACTOR")
                .unwrap_or_else(default_token_refresh_jitter_factor),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            crypto_key,
            state_key,
            oauth_redirect_base,
            http,
            fetch,
            token_refresh,
            google: take_provider(&mut layered, ProviderId::Google),
            meta: take_provider(&mut layered, ProviderId::Meta),
            tiktok: take_provider(&mut layered, ProviderId::Tiktok),
            linkedin: take_provider(&mut layered, ProviderId::Linkedin),
            google_developer_token: take_string(&mut layered, "GOOGLE_DEVELOPER_TOKEN"),
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("ADS_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    take_string(values, key).and_then(|v| v.parse().ok())
}

fn take_list(values: &mut BTreeMap<String, String>, key: &str) -> Option<Vec<String>> {
    take_string(values, key).map(|list| {
        list.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn take_key(
    values: &mut BTreeMap<String, String>,
    key: &str,
    name: &'static str,
) -> Result<Option<Vec<u8>>, ConfigError> {
    take_string(values, key)
        .map(|encoded| {
            general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| ConfigError::InvalidKeyBase64 {
                    name,
                    error: e.to_string(),
                })
        })
        .transpose()
}

/// Reads `<PROVIDER>_CLIENT_ID`, `_CLIENT_SECRET`, `_SCOPES`, `_OAUTH_BASE`,
/// `_TOKEN_BASE` and `_API_BASE`, keeping defaults for anything unset.
fn take_provider(values: &mut BTreeMap<String, String>, provider: ProviderId) -> ProviderOAuthConfig {
    let prefix = provider.as_str().to_ascii_uppercase();
    let mut config = ProviderOAuthConfig::defaults_for(provider);

    config.client_id = take_string(values, &format!("{prefix}_CLIENT_ID"));
    config.client_secret = take_string(values, &format!("{prefix}_CLIENT_SECRET"));
    if let Some(scopes) = take_list(values, &format!("{prefix}_SCOPES"))
        && !scopes.is_empty()
    {
        config.scopes = scopes;
    }
    if let Some(base) = take_string(values, &format!("{prefix}_OAUTH_BASE")) {
        config.oauth_base = base;
    }
    if let Some(base) = take_string(values, &format!("{prefix}_TOKEN_BASE")) {
        config.token_base = base;
    }
    if let Some(base) = take_string(values, &format!("{prefix}_API_BASE")) {
        config.api_base = base;
    }
    config
}
