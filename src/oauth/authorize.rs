//! Authorization URL construction per provider.

use url::Url;

use crate::config::ProviderOAuthConfig;
use crate::error::IntegrationError;
use crate::models::provider::ProviderId;

use super::pkce::CHALLENGE_METHOD;

const MAX_AUTHORIZE_URL_LEN: usize = 2048;

/// Only Google's consent flow takes a PKCE challenge.
pub fn uses_pkce(provider: ProviderId) -> bool {
    matches!(provider, ProviderId::Google)
}

/// Build the consent-screen URL the user is redirected to.
pub fn build_authorize_url(
    provider: ProviderId,
    config: &ProviderOAuthConfig,
    redirect_uri: &str,
    state: &str,
    pkce_challenge: Option<&str>,
) -> Result<Url, IntegrationError> {
    let (client_id, _) = config
        .client_credentials()
        .ok_or(IntegrationError::CredentialsNotConfigured { provider })?;

    let base = config.oauth_base.trim_end_matches('/');
    let path = match provider {
        ProviderId::Google => "/o/oauth2/v2/auth",
        ProviderId::Meta => "/v19.0/dialog/oauth",
        ProviderId::Tiktok => "/portal/auth",
        ProviderId::Linkedin => "/oauth/v2/authorization",
    };
    let mut url = Url::parse(&format!("{base}{path}")).map_err(|e| {
        IntegrationError::InvalidConfiguration {
            provider,
            details: format!("oauth base '{}': {e}", config.oauth_base),
        }
    })?;

    {
        let mut query = url.query_pairs_mut();
        let client_param = if provider == ProviderId::Tiktok {
            "app_id"
        } else {
            "client_id"
        };
        query
            .append_pair(client_param, client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", state);

        // Google and LinkedIn expect space-delimited scopes, Meta and TikTok commas.
        let separator = match provider {
            ProviderId::Google | ProviderId::Linkedin => " ",
            ProviderId::Meta | ProviderId::Tiktok => ",",
        };
        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes.join(separator));
        }

        if provider == ProviderId::Google {
            query
                .append_pair("access_type", "offline")
                .append_pair("prompt", "consent")
                .append_pair("include_granted_scopes", "true");
            if let Some(challenge) = pkce_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", CHALLENGE_METHOD);
            }
        }
    }

    validate_authorize_url(provider, &url)?;
    Ok(url)
}

/// HTTPS (loopback hosts excepted), no fragment, at most 2048 characters.
fn validate_authorize_url(provider: ProviderId, url: &Url) -> Result<(), IntegrationError> {
    let loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
    let invalid = |details: &str| IntegrationError::InvalidConfiguration {
        provider,
        details: details.to_string(),
    };

    if url.scheme() != "https" && !loopback {
        return Err(invalid("authorization URL must use HTTPS"));
    }
    if url.fragment().is_some() {
        return Err(invalid("authorization URL must not include a fragment"));
    }
    if url.as_str().len() > MAX_AUTHORIZE_URL_LEN {
        return Err(invalid("authorization URL exceeds 2048 characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn configured(provider: ProviderId) -> ProviderOAuthConfig {
        ProviderOAuthConfig {
            client_id: Some("client-123".into()),
            client_secret: Some("secret".into()),
            ..ProviderOAuthConfig::defaults_for(provider)
        }
    }

    fn params(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn google_url_carries_pkce_and_offline_access() {
        let url = build_authorize_url(
            ProviderId::Google,
            &configured(ProviderId::Google),
            "https://app.example.com/callback/google",
            "opaque-state",
            Some("challenge-value"),
        )
        .unwrap();

        assert!(url.as_str().starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        let params = params(&url);
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["scope"], "https://www.googleapis.com/auth/adwords");
        assert_eq!(params["code_challenge"], "challenge-value");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["state"], "opaque-state");
    }

    #[test]
    fn tiktok_uses_app_id() {
        let url = build_authorize_url(
            ProviderId::Tiktok,
            &configured(ProviderId::Tiktok),
            "https://app.example.com/callback/tiktok",
            "s",
            None,
        )
        .unwrap();
        let params = params(&url);
        assert_eq!(params["app_id"], "client-123");
        assert!(!params.contains_key("client_id"));
        assert_eq!(params["scope"], "ad.manage,ad.read,report.advertiser");
    }

    #[test]
    fn linkedin_scopes_are_space_delimited() {
        let url = build_authorize_url(
            ProviderId::Linkedin,
            &configured(ProviderId::Linkedin),
            "https://app.example.com/callback/linkedin",
            "s",
            None,
        )
        .unwrap();
        assert_eq!(params(&url)["scope"], "r_ads r_ads_reporting r_organization_admin");
        assert!(!params(&url).contains_key("code_challenge"));
    }

    #[test]
    fn missing_client_credentials_are_reported() {
        let result = build_authorize_url(
            ProviderId::Meta,
            &ProviderOAuthConfig::defaults_for(ProviderId::Meta),
            "https://app.example.com/callback/meta",
            "s",
            None,
        );
        assert!(matches!(
            result,
            Err(IntegrationError::CredentialsNotConfigured {
                provider: ProviderId::Meta
            })
        ));
    }

    #[test]
    fn plain_http_is_rejected_except_loopback() {
        let mut config = configured(ProviderId::Meta);
        config.oauth_base = "http://auth.example.com".into();
        assert!(matches!(
            build_authorize_url(ProviderId::Meta, &config, "https://x/cb", "s", None),
            Err(IntegrationError::InvalidConfiguration { .. })
        ));

        config.oauth_base = "http://127.0.0.1:9000".into();
        assert!(build_authorize_url(ProviderId::Meta, &config, "https://x/cb", "s", None).is_ok());
    }
}
