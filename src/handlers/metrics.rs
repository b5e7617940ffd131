//! # Metrics Handler
//!
//! Aggregates canonical campaign metrics over the acting user's connected
//! ad accounts.

use axum::{extract::State, extract::rejection::JsonRejection, response::Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{ActingUser, UserHeader};
use crate::error::{ApiError, validation_error};
use crate::models::credential::CredentialKey;
use crate::models::metrics::{
    AccountFailure, CanonicalMetricRecord, ConnectedAccount, DateRange, MetricsSummary,
};
use crate::models::provider::ProviderId;
use crate::normalization::summarize;
use crate::server::AppState;

const MAX_ACCOUNTS_PER_REQUEST: usize = 100;

/// One ad account to include
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AccountRef {
    /// Platform identifier; unknown platforms are skipped
    pub provider: String,
    /// Customer id, ad account id, advertiser id or sponsored account id
    pub account_id: String,
    /// Credential binding; omit for the workspace-wide credential
    #[serde(default)]
    pub workspace_client_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MetricsRequest {
    pub accounts: Vec<AccountRef>,
    /// First day, inclusive
    pub start: NaiveDate,
    /// Last day, inclusive
    pub end: NaiveDate,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MetricsResponse {
    pub records: Vec<CanonicalMetricRecord>,
    /// Accounts that contributed nothing, with the reason
    pub failures: Vec<AccountFailure>,
    pub summary: MetricsSummary,
}

/// Aggregate metrics across ad accounts
///
/// Each account is fetched independently; a failing account is reported in
/// `failures` and never fails the request.
#[utoipa::path(
    post,
    path = "/metrics",
    params(UserHeader),
    request_body = MetricsRequest,
    responses(
        (status = 200, description = "Aggregated records", body = MetricsResponse),
        (status = 400, description = "Invalid body or date range", body = ApiError),
        (status = 503, description = "Aggregation cancelled by shutdown", body = ApiError)
    ),
    tag = "metrics"
)]
pub async fn aggregate_metrics(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    payload: Result<Json<MetricsRequest>, JsonRejection>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let Json(request) = payload?;
    if request.accounts.len() > MAX_ACCOUNTS_PER_REQUEST {
        return Err(validation_error("too many accounts in one request"));
    }
    let range = DateRange::new(request.start, request.end)?;

    let accounts: Vec<ConnectedAccount> = request
        .accounts
        .into_iter()
        .filter_map(|account| match account.provider.parse::<ProviderId>() {
            Ok(provider) => Some(ConnectedAccount {
                provider,
                credential_ref: CredentialKey::new(
                    user_id.clone(),
                    provider,
                    account.workspace_client_id,
                ),
                account_id: account.account_id,
            }),
            Err(_) => {
                tracing::warn!(provider = %account.provider, "Skipping account of unknown provider");
                None
            }
        })
        .collect();

    // Dropping this future on client disconnect aborts the fetch tasks too.
    let cancel = state.shutdown.child_token();
    let aggregated = state
        .ads
        .get_all_metrics_detailed(&accounts, range, &cancel)
        .await?;

    let summary = summarize(&aggregated.records);
    Ok(Json(MetricsResponse {
        records: aggregated.records,
        failures: aggregated.failures,
        summary,
    }))
}
