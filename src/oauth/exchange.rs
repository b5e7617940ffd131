//! Token exchange against each platform's token endpoint.
//!
//! All four platforms speak a variant of OAuth 2.0:
//!
//! | Provider | Code exchange | Refresh |
//! |----------|---------------|---------|
//! | Google   | form `POST /token`, PKCE verifier | `grant_type=refresh_token` |
//! | Meta     | `GET /v19.0/oauth/access_token` query | `fb_exchange_token` on the access token |
//! | TikTok   | JSON `POST /open_api/v1.3/oauth2/access_token/` | JSON `POST .../oauth2/refresh_token/` |
//! | LinkedIn | form `POST /oauth/v2/accessToken` | `grant_type=refresh_token` |
//!
//! TikTok wraps every response in `{code, message, data}` and reports
//! failures with HTTP 200 and a non-zero `code`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::config::{AppConfig, ProviderOAuthConfig};
use crate::error::IntegrationError;
use crate::http;
use crate::models::credential::{CredentialKey, ProviderCredential, SecretString};
use crate::models::provider::ProviderId;

/// Declared lifetimes are shortened by this much so a token is never used in
/// its final moments.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 30;

/// Longest lifetime accepted from a token endpoint (ten years).
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Tokens returned by a successful grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_in_seconds: Option<i64>,
    pub refresh_expires_in_seconds: Option<i64>,
    pub granted_scopes: BTreeSet<String>,
    /// Account the grant is bound to, when the platform says (TikTok
    /// returns the authorized advertiser ids).
    pub bound_account_id: Option<String>,
}

fn expiry_from(now: DateTime<Utc>, lifetime_secs: Option<i64>) -> Option<DateTime<Utc>> {
    lifetime_secs.map(|secs| {
        let secs = secs
            .clamp(0, MAX_TOKEN_LIFETIME_SECS)
            .saturating_sub(EXPIRY_SAFETY_MARGIN_SECS)
            .max(0);
        Duration::try_seconds(secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(now)
    })
}

impl TokenGrant {
    pub fn access_expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        expiry_from(now, self.expires_in_seconds)
    }

    pub fn refresh_expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        expiry_from(now, self.refresh_expires_in_seconds)
    }

    /// Credential produced by an initial authorization.
    pub fn into_credential(self, key: &CredentialKey, now: DateTime<Utc>) -> ProviderCredential {
        let access_token_expires_at = self.access_expires_at(now);
        let refresh_token_expires_at = self.refresh_expires_at(now);
        ProviderCredential {
            user_id: key.user_id.clone(),
            provider: key.provider,
            workspace_client_id: key.workspace_client_id.clone(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            scopes: self.granted_scopes,
            bound_account_id: self.bound_account_id,
            access_token_expires_at,
            refresh_token_expires_at,
        }
    }

    /// Apply a refresh grant on top of the stored credential. Platforms that
    /// do not rotate refresh tokens keep the previous one and its expiry.
    pub fn merge_into(self, existing: &ProviderCredential, now: DateTime<Utc>) -> ProviderCredential {
        let access_token_expires_at = self.access_expires_at(now);
        let rotated_refresh_expiry = self.refresh_expires_at(now);
        let (refresh_token, refresh_token_expires_at) = match self.refresh_token {
            Some(token) => (Some(token), rotated_refresh_expiry),
            None => (
                existing.refresh_token.clone(),
                existing.refresh_token_expires_at,
            ),
        };
        ProviderCredential {
            access_token: self.access_token,
            refresh_token,
            scopes: if self.granted_scopes.is_empty() {
                existing.scopes.clone()
            } else {
                self.granted_scopes
            },
            bound_account_id: self
                .bound_account_id
                .or_else(|| existing.bound_account_id.clone()),
            access_token_expires_at,
            refresh_token_expires_at,
            ..existing.clone()
        }
    }
}

/// The secret a platform expects for a refresh grant. Meta has no refresh
/// token and re-exchanges the long-lived access token instead.
pub fn refresh_secret(credential: &ProviderCredential) -> Option<&SecretString> {
    match credential.provider {
        ProviderId::Meta => Some(&credential.access_token),
        _ => credential.refresh_token.as_ref().filter(|t| !t.is_empty()),
    }
}

/// Swaps authorization codes and refresh tokens for fresh tokens.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Exchange an authorization code. `pkce_verifier` is forwarded to
    /// platforms that took a challenge at authorization time.
    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenGrant, IntegrationError>;

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, IntegrationError>;
}

/// One token client per platform, all sharing `http`.
pub fn clients_from_config(
    config: &AppConfig,
    http: &reqwest::Client,
) -> HashMap<ProviderId, Arc<dyn TokenExchanger>> {
    ProviderId::ALL
        .iter()
        .map(|&provider| {
            let client: Arc<dyn TokenExchanger> = Arc::new(OAuthTokenClient::new(
                provider,
                config.provider(provider).clone(),
                http.clone(),
            ));
            (provider, client)
        })
        .collect()
}

/// HTTP token client for one platform.
#[derive(Clone)]
pub struct OAuthTokenClient {
    provider: ProviderId,
    config: ProviderOAuthConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StandardTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token_expires_in: Option<i64>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TiktokEnvelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<TiktokTokenData>,
}

#[derive(Debug, Deserialize)]
struct TiktokTokenData {
    access_token: Option<String>,
    refresh_token: Option<String>,
    access_token_expires_in: Option<i64>,
    refresh_token_expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<Value>,
    #[serde(default)]
    advertiser_ids: Vec<Value>,
}

fn split_scopes(raw: &str) -> BTreeSet<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty_secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.is_empty()).map(SecretString::new)
}

impl OAuthTokenClient {
    pub fn new(provider: ProviderId, config: ProviderOAuthConfig, http: reqwest::Client) -> Self {
        Self {
            provider,
            config,
            http,
        }
    }

    fn credentials(&self) -> Result<(&str, &str), IntegrationError> {
        self.config
            .client_credentials()
            .ok_or(IntegrationError::CredentialsNotConfigured {
                provider: self.provider,
            })
    }

    fn token_url(&self, path: &str) -> String {
        format!("{}{}", self.config.token_base.trim_end_matches('/'), path)
    }

    fn malformed(&self, details: impl Into<String>) -> IntegrationError {
        IntegrationError::MalformedResponse {
            provider: self.provider,
            details: details.into(),
        }
    }

    fn lifetime(&self, field: &str, value: Option<i64>) -> Result<Option<i64>, IntegrationError> {
        match value {
            Some(secs) if !(0..=MAX_TOKEN_LIFETIME_SECS).contains(&secs) => {
                Err(self.malformed(format!("{field} of {secs}s is out of range")))
            }
            other => Ok(other),
        }
    }

    async fn send_standard(&self, request: reqwest::RequestBuilder) -> Result<TokenGrant, IntegrationError> {
        let response = http::send(self.provider, request.header("Accept", "application/json")).await?;
        let body: StandardTokenResponse = http::read_json(self.provider, response).await?;

        let access_token = non_empty_secret(body.access_token)
            .ok_or_else(|| self.malformed("token response has no access_token"))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: non_empty_secret(body.refresh_token),
            expires_in_seconds: self.lifetime("expires_in", body.expires_in)?,
            refresh_expires_in_seconds: self
                .lifetime("refresh_token_expires_in", body.refresh_token_expires_in)?,
            granted_scopes: body.scope.as_deref().map(split_scopes).unwrap_or_default(),
            bound_account_id: None,
        })
    }

    async fn send_tiktok(&self, path: &str, payload: Value) -> Result<TokenGrant, IntegrationError> {
        let request = self
            .http
            .post(self.token_url(path))
            .header("Accept", "application/json")
            .json(&payload);
        let response = http::send(self.provider, request).await?;
        let status = response.status();
        let envelope: TiktokEnvelope = http::read_json(self.provider, response).await?;

        if envelope.code != 0 {
            return Err(IntegrationError::ProviderRejected {
                provider: self.provider,
                status: status.as_u16(),
                error_code: Some(envelope.code.to_string()),
                description: envelope.message,
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| self.malformed("token envelope has no data"))?;
        let access_token = non_empty_secret(data.access_token)
            .ok_or_else(|| self.malformed("token response has no access_token"))?;

        let granted_scopes = match data.scope {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => split_scopes(&s),
            _ => BTreeSet::new(),
        };

        let bound_account_id = match data.advertiser_ids.as_slice() {
            [Value::String(id)] => Some(id.clone()),
            [Value::Number(id)] => Some(id.to_string()),
            _ => None,
        };

        Ok(TokenGrant {
            access_token,
            refresh_token: non_empty_secret(data.refresh_token),
            expires_in_seconds: self.lifetime("access_token_expires_in", data.access_token_expires_in)?,
            refresh_expires_in_seconds: self
                .lifetime("refresh_token_expires_in", data.refresh_token_expires_in)?,
            granted_scopes,
            bound_account_id,
        })
    }

    fn record(&self, grant: &'static str, result: &Result<TokenGrant, IntegrationError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(err) => err.code(),
        };
        counter!(
            "ads_token_exchange_total",
            "provider" => self.provider.as_str(),
            "grant" => grant,
            "outcome" => outcome
        )
        .increment(1);
        if let Err(err) = result {
            warn!(provider = %self.provider, grant, error = %err, "Token grant failed");
        }
    }
}

#[async_trait]
impl TokenExchanger for OAuthTokenClient {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    #[instrument(skip_all, fields(provider = %self.provider))]
    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenGrant, IntegrationError> {
        let (client_id, client_secret) = self.credentials()?;
        debug!("Exchanging authorization code");

        let result = match self.provider {
            ProviderId::Google => {
                let mut form = vec![
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                ];
                if let Some(verifier) = pkce_verifier {
                    form.push(("code_verifier", verifier));
                }
                self.send_standard(self.http.post(self.token_url("/token")).form(&form))
                    .await
            }
            ProviderId::Linkedin => {
                let form = [
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                ];
                self.send_standard(
                    self.http
                        .post(self.token_url("/oauth/v2/accessToken"))
                        .form(&form),
                )
                .await
            }
            ProviderId::Meta => {
                let query = [
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("redirect_uri", redirect_uri),
                    ("code", code),
                ];
                self.send_standard(
                    self.http
                        .get(self.token_url("/v19.0/oauth/access_token"))
                        .query(&query),
                )
                .await
            }
            ProviderId::Tiktok => {
                self.send_tiktok(
                    "/open_api/v1.3/oauth2/access_token/",
                    json!({ "app_id": client_id, "secret": client_secret, "auth_code": code }),
                )
                .await
            }
        };

        self.record("authorization_code", &result);
        result
    }

    #[instrument(skip_all, fields(provider = %self.provider))]
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, IntegrationError> {
        let (client_id, client_secret) = self.credentials()?;
        let token = refresh_token.expose();

        let result = match self.provider {
            ProviderId::Google | ProviderId::Linkedin => {
                let path = if self.provider == ProviderId::Google {
                    "/token"
                } else {
                    "/oauth/v2/accessToken"
                };
                let form = [
                    ("grant_type", "refresh_token"),
                    ("refresh_token", token),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                ];
                self.send_standard(self.http.post(self.token_url(path)).form(&form))
                    .await
            }
            ProviderId::Meta => {
                let query = [
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("fb_exchange_token", token),
                ];
                self.send_standard(
                    self.http
                        .get(self.token_url("/v19.0/oauth/access_token"))
                        .query(&query),
                )
                .await
            }
            ProviderId::Tiktok => {
                self.send_tiktok(
                    "/open_api/v1.3/oauth2/refresh_token/",
                    json!({
                        "app_id": client_id,
                        "secret": client_secret,
                        "refresh_token": token,
                        "grant_type": "refresh_token",
                    }),
                )
                .await
            }
        };

        self.record("refresh_token", &result);
        result
    }
}
