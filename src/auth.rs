//! # Acting User
//!
//! Requests name the user they act for in the `X-User-Id` header. An
//! upstream gateway authenticates the caller; this service only requires the
//! header to be present and well formed.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::error::{ApiError, validation_error};

pub const USER_HEADER: &str = "x-user-id";
const MAX_USER_ID_LEN: usize = 128;

/// User on whose behalf the request runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser(pub String);

/// OpenAPI header parameter for X-User-Id
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct UserHeader {
    /// Identifier of the user the request acts for
    #[serde(rename = "X-User-Id")]
    #[param(rename = "X-User-Id", value_type = String)]
    pub user_id: String,
}

impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| validation_error("Missing required header X-User-Id"))?
            .to_str()
            .map_err(|_| validation_error("X-User-Id must be valid UTF-8"))?
            .trim();

        // The id ends up in credential keys, where '|' separates fields.
        if value.is_empty()
            || value.len() > MAX_USER_ID_LEN
            || value.chars().any(|c| c == '|' || c.is_control())
        {
            return Err(validation_error("X-User-Id is empty or contains invalid characters"));
        }
        Ok(ActingUser(value.to_string()))
    }
}
