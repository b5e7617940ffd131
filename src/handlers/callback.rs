//! # OAuth Callback Handler

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;

use crate::error::{ApiError, IntegrationError};
use crate::models::provider::ProviderId;
use crate::oauth::ConnectionEstablished;
use crate::server::AppState;

pub const FLOW_NONCE_HEADER: &str = "x-flow-nonce";

/// Query parameters the provider appends to the redirect URI
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set instead of `code` when the user declined consent
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Complete the OAuth flow
///
/// Validates the state against the nonce in `X-Flow-Nonce`, exchanges the
/// code, stores the credential and queues the initial backfill.
#[utoipa::path(
    get,
    path = "/callback/{provider}",
    params(
        ("provider" = String, Path, description = "google, meta, tiktok or linkedin"),
        CallbackParams,
        ("X-Flow-Nonce" = String, Header, description = "Nonce returned by POST /connect/{provider}")
    ),
    responses(
        (status = 200, description = "Provider connected", body = ConnectionEstablished),
        (status = 400, description = "Invalid, expired or foreign state, or consent denied", body = ApiError),
        (status = 404, description = "Unknown provider", body = ApiError),
        (status = 502, description = "Provider rejected the code exchange", body = ApiError),
        (status = 503, description = "Provider unreachable", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<Json<ConnectionEstablished>, ApiError> {
    let provider: ProviderId = provider.parse()?;

    if let Some(error) = params.error {
        tracing::info!(provider = %provider, error = %error, "Provider returned an authorization error");
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "AUTHORIZATION_DENIED",
            "The provider did not grant access",
        )
        .with_details(json!({
            "provider": provider,
            "error": error,
            "error_description": params.error_description,
        })));
    }

    let oauth_state = params
        .state
        .filter(|s| !s.is_empty())
        .ok_or(IntegrationError::InvalidState { reason: "missing state" })?;
    let nonce = headers
        .get(FLOW_NONCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let established = state
        .oauth
        .complete_callback(provider, params.code.as_deref().unwrap_or_default(), &oauth_state, nonce)
        .await?;
    Ok(Json(established))
}
