//! Outbound HTTP plumbing shared by token exchange and provider adapters:
//! client construction with timeouts, provider error extraction and the
//! bounded transport retry helper.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::config::HttpConfig;
use crate::error::IntegrationError;
use crate::models::provider::ProviderId;

const USER_AGENT: &str = concat!("ads-connectors/", env!("CARGO_PKG_VERSION"));

/// Largest response body buffered from a provider.
pub const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

/// Build the shared client. Every request inherits the configured timeouts.
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .user_agent(USER_AGENT)
        .build()
}

/// Send a request, mapping network failures and timeouts to `Transport`.
pub async fn send(provider: ProviderId, request: RequestBuilder) -> Result<Response, IntegrationError> {
    request
        .send()
        .await
        .map_err(|e| IntegrationError::transport(provider, &e))
}

/// Read a response body as JSON. Non-success statuses become
/// `ProviderRejected`; unparseable or oversized success bodies become
/// `MalformedResponse`.
pub async fn read_json<T: DeserializeOwned>(
    provider: ProviderId,
    response: Response,
) -> Result<T, IntegrationError> {
    read_json_within(provider, response, MAX_RESPONSE_BYTES).await
}

pub(crate) async fn read_json_within<T: DeserializeOwned>(
    provider: ProviderId,
    response: Response,
    limit: usize,
) -> Result<T, IntegrationError> {
    let status = response.status();
    let (body, truncated) = read_capped(provider, response, limit).await?;

    if !status.is_success() {
        // Error bodies are only mined for diagnostics, so a prefix is enough.
        return Err(rejection(provider, status, &String::from_utf8_lossy(&body)));
    }
    if truncated {
        return Err(IntegrationError::MalformedResponse {
            provider,
            details: format!("response body exceeds {limit} bytes"),
        });
    }

    serde_json::from_slice(&body).map_err(|e| IntegrationError::MalformedResponse {
        provider,
        details: e.to_string(),
    })
}

/// Buffer at most `limit` bytes of the body. The flag reports whether the
/// body was longer; the rest is never read.
async fn read_capped(
    provider: ProviderId,
    mut response: Response,
    limit: usize,
) -> Result<(Vec<u8>, bool), IntegrationError> {
    let declared_too_large = response
        .content_length()
        .is_some_and(|len| len > limit as u64);
    if declared_too_large && response.status().is_success() {
        return Ok((Vec::new(), true));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| IntegrationError::transport(provider, &e))?
    {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

/// Extract the provider's error code and description from an error body.
///
/// Understands the OAuth2 `{error, error_description}` shape, the Graph/Google
/// `{error: {code|status, message}}` shape, TikTok's `{code, message}` envelope
/// and LinkedIn's `{serviceErrorCode, message}`. Anything else is kept as the
/// raw description.
pub fn rejection(provider: ProviderId, status: StatusCode, body: &str) -> IntegrationError {
    let (error_code, description) = match serde_json::from_str::<Value>(body) {
        Ok(json) => extract_error_fields(&json),
        Err(_) => (None, None),
    };

    let description = description.or_else(|| {
        let trimmed = body.trim();
        (!trimmed.is_empty()).then(|| trimmed.chars().take(512).collect())
    });

    IntegrationError::ProviderRejected {
        provider,
        status: status.as_u16(),
        error_code,
        description,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_error_fields(json: &Value) -> (Option<String>, Option<String>) {
    match json.get("error") {
        Some(Value::String(code)) => (
            Some(code.clone()),
            json.get("error_description").and_then(scalar_to_string),
        ),
        Some(Value::Object(inner)) => {
            let code = inner
                .get("type")
                .or_else(|| inner.get("status"))
                .or_else(|| inner.get("code"))
                .and_then(scalar_to_string);
            let message = inner.get("message").and_then(scalar_to_string);
            (code, message)
        }
        _ => {
            let code = json
                .get("serviceErrorCode")
                .or_else(|| json.get("code"))
                .and_then(scalar_to_string);
            let message = json.get("message").and_then(scalar_to_string);
            (code, message)
        }
    }
}

/// Bounded exponential backoff for transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based), with up to 10% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = (exp.as_millis() as u64) / 10;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Run `op`, retrying only retryable (`Transport`) failures up to
/// `policy.max_retries` times. Provider verdicts are returned immediately.
pub async fn retry_transport<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, IntegrationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IntegrationError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transport failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
