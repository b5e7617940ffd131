//! # API Handlers
//!
//! HTTP endpoints over the integration layer: OAuth connect and callback,
//! disconnect, provider metadata and metric aggregation.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod callback;
pub mod connect;
pub mod connections;
pub mod metrics;
pub mod providers;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

#[cfg(test)]
mod tests;
