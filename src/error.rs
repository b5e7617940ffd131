//! # Error Handling
//!
//! Two layers live here:
//!
//! - [`IntegrationError`], the taxonomy every component of the integration layer
//!   returns (state integrity, deployment misconfiguration, provider-side
//!   failures, transport failures, per-account fetch failures).
//! - [`ApiError`], the problem+json response used by the HTTP surface, with a
//!   mapping from [`IntegrationError`] and trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::crypto::CryptoError;
use crate::models::credential::CredentialKey;
use crate::models::provider::ProviderId;
use crate::telemetry;

/// Errors produced by the ad-platform integration layer.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// The OAuth state is absent, malformed, fails decryption, misses fields,
    /// or does not match the flow the caller issued.
    #[error("invalid OAuth state: {reason}")]
    InvalidState { reason: &'static str },

    /// The OAuth state decrypted correctly but its TTL has elapsed.
    #[error("OAuth state expired ({age_ms}ms after issue)")]
    ExpiredState { age_ms: i64 },

    /// Server-side client id/secret for the provider are missing.
    #[error("{provider} OAuth client credentials are not configured")]
    CredentialsNotConfigured { provider: ProviderId },

    /// Provider endpoints are configured with values that cannot be used.
    #[error("{provider} OAuth configuration is invalid: {details}")]
    InvalidConfiguration {
        provider: ProviderId,
        details: String,
    },

    /// The provider answered with a non-success response. Code and
    /// description are carried verbatim from the provider body.
    #[error(
        "{provider} rejected the request (HTTP {status}, {code}): {description}",
        code = .error_code.as_deref().unwrap_or("unknown_error"),
        description = .description.as_deref().unwrap_or("no description")
    )]
    ProviderRejected {
        provider: ProviderId,
        status: u16,
        error_code: Option<String>,
        description: Option<String>,
    },

    /// A success response could not be parsed into the expected shape.
    #[error("{provider} returned a malformed response: {details}")]
    MalformedResponse {
        provider: ProviderId,
        details: String,
    },

    /// Network failure or timeout. Eligible for caller-level retry.
    #[error("transport error talking to {provider}: {details}")]
    Transport {
        provider: ProviderId,
        details: String,
        timed_out: bool,
    },

    /// Fetching an account failed before any row was recovered.
    #[error("fetching {provider} account {account_id} failed: {source}")]
    ProviderFetch {
        provider: ProviderId,
        account_id: String,
        #[source]
        source: Box<IntegrationError>,
    },

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("no stored credential for {0}")]
    CredentialNotFound(CredentialKey),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("operation cancelled")]
    Cancelled,
}

impl IntegrationError {
    /// Only transport failures are worth retrying; everything else is either
    /// a protocol violation or a provider verdict.
    pub fn is_retryable(&self) -> bool {
        match self {
            IntegrationError::Transport { .. } => true,
            IntegrationError::ProviderFetch { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Provider the error originated from, when known.
    pub fn provider(&self) -> Option<ProviderId> {
        match self {
            IntegrationError::CredentialsNotConfigured { provider }
            | IntegrationError::InvalidConfiguration { provider, .. }
            | IntegrationError::ProviderRejected { provider, .. }
            | IntegrationError::MalformedResponse { provider, .. }
            | IntegrationError::Transport { provider, .. }
            | IntegrationError::ProviderFetch { provider, .. } => Some(*provider),
            IntegrationError::CredentialNotFound(key) => Some(key.provider),
            _ => None,
        }
    }

    /// Build a transport error from a reqwest failure.
    pub fn transport(provider: ProviderId, err: &reqwest::Error) -> Self {
        IntegrationError::Transport {
            provider,
            details: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }

    /// Stable machine-readable code used in logs and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            IntegrationError::InvalidState { .. } => "INVALID_STATE",
            IntegrationError::ExpiredState { .. } => "EXPIRED_STATE",
            IntegrationError::CredentialsNotConfigured { .. } => "PROVIDER_NOT_CONFIGURED",
            IntegrationError::InvalidConfiguration { .. } => "INVALID_PROVIDER_CONFIG",
            IntegrationError::ProviderRejected { .. } => "PROVIDER_REJECTED",
            IntegrationError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            IntegrationError::Transport { .. } => "TRANSPORT_ERROR",
            IntegrationError::ProviderFetch { .. } => "PROVIDER_FETCH_FAILED",
            IntegrationError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            IntegrationError::CredentialNotFound(_) => "CREDENTIAL_NOT_FOUND",
            IntegrationError::InvalidDateRange(_) => "VALIDATION_FAILED",
            IntegrationError::Store(_) => "STORE_ERROR",
            IntegrationError::Crypto(_) => "CRYPTO_ERROR",
            IntegrationError::Cancelled => "CANCELLED",
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<IntegrationError> for ApiError {
    fn from(error: IntegrationError) -> Self {
        let code = error.code();
        match &error {
            IntegrationError::InvalidState { .. }
            | IntegrationError::ExpiredState { .. }
            | IntegrationError::InvalidDateRange(_) => {
                Self::new(StatusCode::BAD_REQUEST, code, error.to_string())
            }
            IntegrationError::UnknownProvider(_) | IntegrationError::CredentialNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, code, error.to_string())
            }
            IntegrationError::ProviderRejected {
                provider,
                status,
                error_code,
                description,
            } => Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", error.to_string())
                .with_details(json!({
                    "provider": provider,
                    "status": status,
                    "error_code": error_code,
                    "description": description,
                })),
            IntegrationError::MalformedResponse { provider, .. }
            | IntegrationError::ProviderFetch { provider, .. } => {
                Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", error.to_string())
                    .with_details(json!({ "provider": provider, "reason": code }))
            }
            IntegrationError::Transport { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, error.to_string())
                    .with_retry_after(5)
            }
            IntegrationError::Cancelled => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, code, error.to_string())
            }
            IntegrationError::CredentialsNotConfigured { .. }
            | IntegrationError::InvalidConfiguration { .. }
            | IntegrationError::Store(_)
            | IntegrationError::Crypto(_) => {
                tracing::error!(error = %error, "Integration layer misconfiguration or storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, error.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

/// Create a validation error (400)
pub fn validation_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        let transport = IntegrationError::Transport {
            provider: ProviderId::Meta,
            details: "timed out".into(),
            timed_out: true,
        };
        assert!(transport.is_retryable());

        let rejected = IntegrationError::ProviderRejected {
            provider: ProviderId::Meta,
            status: 400,
            error_code: Some("invalid_grant".into()),
            description: None,
        };
        assert!(!rejected.is_retryable());
        assert!(!IntegrationError::InvalidState { reason: "tampered" }.is_retryable());
    }

    #[test]
    fn test_provider_rejected_display_keeps_provider_text() {
        let err = IntegrationError::ProviderRejected {
            provider: ProviderId::Linkedin,
            status: 400,
            error_code: Some("invalid_request".into()),
            description: Some("Unable to retrieve access token: appid/redirect uri/code verifier does not match authorization code".into()),
        };
        let text = err.to_string();
        assert!(text.contains("linkedin"));
        assert!(text.contains("invalid_request"));
        assert!(text.contains("code verifier does not match"));
    }

    #[test]
    fn test_state_errors_map_to_bad_request() {
        let api: ApiError = IntegrationError::ExpiredState { age_ms: 400_000 }.into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, Box::from("EXPIRED_STATE"));
    }

    #[test]
    fn test_provider_errors_map_to_bad_gateway() {
        let api: ApiError = IntegrationError::ProviderRejected {
            provider: ProviderId::Tiktok,
            status: 200,
            error_code: Some("40001".into()),
            description: Some("auth_code is invalid".into()),
        }
        .into();
        assert_eq!(api.status, StatusCode::BAD_GATEWAY);
        let details = api.details.expect("details present");
        assert_eq!(details["provider"], "tiktok");
        assert_eq!(details["error_code"], "40001");
    }

    #[test]
    fn test_transport_sets_retry_after() {
        let api: ApiError = IntegrationError::Transport {
            provider: ProviderId::Google,
            details: "connection reset".into(),
            timed_out: false,
        }
        .into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        let response = api.into_response();
        assert_eq!(response.headers().get("retry-after").unwrap(), "5");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", "x");
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }
}
