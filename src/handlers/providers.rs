//! # Provider Handlers

use axum::{extract::State, response::Json};

use crate::connectors::ProviderMetadata;
use crate::server::AppState;

/// List supported ad platforms
///
/// `configured` is false for platforms whose OAuth client credentials are
/// missing from this deployment; connecting them fails.
#[utoipa::path(
    get,
    path = "/providers",
    responses(
        (status = 200, description = "Supported platforms", body = [ProviderMetadata])
    ),
    tag = "connections"
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderMetadata>> {
    Json(state.ads.registry().list_metadata(&state.config))
}
