//! # Connection Handlers
//!
//! Start of the OAuth round trip.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::{ActingUser, UserHeader};
use crate::error::{ApiError, validation_error};
use crate::models::provider::ProviderId;
use crate::oauth::AuthorizationRedirect;
use crate::server::AppState;

/// Optional binding and post-connect navigation
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConnectParams {
    /// Bind the credential to one client workspace instead of the whole account
    pub workspace_client_id: Option<String>,
    /// App-relative path to return to after the callback (must start with `/`)
    pub return_path: Option<String>,
}

/// Start OAuth flow for a provider
///
/// Returns the provider authorization URL and the flow nonce. The caller
/// keeps the nonce in its session and presents it again as `X-Flow-Nonce`
/// when the provider redirects back.
#[utoipa::path(
    post,
    path = "/connect/{provider}",
    params(
        ("provider" = String, Path, description = "google, meta, tiktok or linkedin"),
        ConnectParams,
        UserHeader
    ),
    responses(
        (status = 200, description = "Authorization URL generated", body = AuthorizationRedirect),
        (status = 400, description = "Missing user header or invalid return path", body = ApiError),
        (status = 404, description = "Unknown provider", body = ApiError),
        (status = 500, description = "Provider OAuth client not configured", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn start_oauth(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(provider): Path<String>,
    Query(params): Query<ConnectParams>,
) -> Result<Json<AuthorizationRedirect>, ApiError> {
    let provider: ProviderId = provider.parse()?;
    if let Some(path) = params.return_path.as_deref() {
        validate_return_path(path)?;
    }
    let workspace = params.workspace_client_id.filter(|w| !w.trim().is_empty());

    let redirect = state
        .oauth
        .begin(&user_id, provider, workspace, params.return_path)?;
    Ok(Json(redirect))
}

/// Only same-origin, app-relative paths.
fn validate_return_path(path: &str) -> Result<(), ApiError> {
    if !path.starts_with('/') || path.starts_with("//") || path.contains('\\') || path.len() > 512 {
        return Err(validation_error("return_path must be an app-relative path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_path_must_stay_on_origin() {
        assert!(validate_return_path("/clients/42").is_ok());
        assert!(validate_return_path("//evil.example").is_err());
        assert!(validate_return_path("https://evil.example").is_err());
        assert!(validate_return_path("/\\evil.example").is_err());
    }
}
