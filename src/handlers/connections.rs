//! # Connection Management Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::{ActingUser, UserHeader};
use crate::error::ApiError;
use crate::models::credential::CredentialKey;
use crate::models::provider::ProviderId;
use crate::oauth::ConnectionStatus;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConnectionParams {
    /// Binding to address; omit for the workspace-wide credential
    pub workspace_client_id: Option<String>,
}

/// Connection status
///
/// Reports the lifecycle state of the caller's credential for a provider.
/// A binding with nothing stored is `unauthenticated`.
#[utoipa::path(
    get,
    path = "/connections/{provider}",
    params(
        ("provider" = String, Path, description = "google, meta, tiktok or linkedin"),
        ConnectionParams,
        UserHeader
    ),
    responses(
        (status = 200, description = "Current state", body = ConnectionStatus),
        (status = 400, description = "Missing user header", body = ApiError),
        (status = 404, description = "Unknown provider", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connection_status(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(provider): Path<String>,
    Query(params): Query<ConnectionParams>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let provider: ProviderId = provider.parse()?;
    let key = CredentialKey::new(user_id, provider, params.workspace_client_id);
    Ok(Json(state.oauth.status(&key).await?))
}

/// Disconnect a provider
///
/// Deletes the stored credential. Sync jobs already queued are left alone.
#[utoipa::path(
    delete,
    path = "/connections/{provider}",
    params(
        ("provider" = String, Path, description = "google, meta, tiktok or linkedin"),
        ConnectionParams,
        UserHeader
    ),
    responses(
        (status = 204, description = "Credential removed"),
        (status = 400, description = "Missing user header", body = ApiError),
        (status = 404, description = "Unknown provider or no stored credential", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(provider): Path<String>,
    Query(params): Query<ConnectionParams>,
) -> Result<StatusCode, ApiError> {
    let provider: ProviderId = provider.parse()?;
    let key = CredentialKey::new(user_id, provider, params.workspace_client_id);
    state.oauth.disconnect(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
