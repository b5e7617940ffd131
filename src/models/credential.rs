//! Provider credentials and their lifecycle.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::provider::ProviderId;

/// Opaque secret (access or refresh token). Zeroized on drop and redacted in
/// `Debug`/`Display`; the raw value is only reachable through [`expose`].
///
/// [`expose`]: SecretString::expose
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(****)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Identity of a stored credential: `(user, provider, workspace)`, where no
/// workspace means a workspace-wide binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct CredentialKey {
    pub user_id: String,
    pub provider: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_client_id: Option<String>,
}

impl CredentialKey {
    pub fn new(
        user_id: impl Into<String>,
        provider: ProviderId,
        workspace_client_id: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
            workspace_client_id,
        }
    }

    /// Associated data binding encrypted tokens to this key, also used as
    /// the unique row key. Free-form parts are length-prefixed so distinct
    /// keys never encode to the same string.
    pub fn aad(&self) -> String {
        let workspace = match &self.workspace_client_id {
            Some(ws) => format!("{}:{ws}", ws.len()),
            None => "-".to_string(),
        };
        format!(
            "{}:{}|{}|{}",
            self.user_id.len(),
            self.user_id,
            self.provider,
            workspace
        )
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.user_id,
            self.provider,
            self.workspace_client_id.as_deref().unwrap_or("*")
        )
    }
}

/// OAuth credential for one (user, provider, workspace).
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCredential {
    pub user_id: String,
    pub provider: ProviderId,
    pub workspace_client_id: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub scopes: BTreeSet<String>,
    pub bound_account_id: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

impl ProviderCredential {
    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(
            self.user_id.clone(),
            self.provider,
            self.workspace_client_id.clone(),
        )
    }

    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_token_expires_at.is_some_and(|at| at <= now)
    }

    /// A refresh token exists and has not passed its own expiry.
    pub fn can_refresh(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.as_ref().is_some_and(|t| !t.is_empty())
            && self.refresh_token_expires_at.is_none_or(|at| at > now)
    }
}

/// Lifecycle of one credential.
///
/// ```text
/// Unauthenticated -> PendingCallback -> Authenticated -> Refreshing -> Authenticated
///        ^                  |                 |              |-> Expired
///        +---- (TTL) -------+                 +-> Revoked    +-> Revoked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Unauthenticated,
    PendingCallback,
    Authenticated,
    Refreshing,
    Expired,
    Revoked,
}

impl CredentialState {
    /// Derive the state of whatever the store currently holds for a key.
    pub fn observe(credential: Option<&ProviderCredential>, now: DateTime<Utc>) -> Self {
        match credential {
            None => CredentialState::Unauthenticated,
            Some(c) if c.is_access_expired(now) => CredentialState::Expired,
            Some(_) => CredentialState::Authenticated,
        }
    }

    /// A pending flow lapses back to `Unauthenticated` once its state TTL passes.
    pub fn observe_pending(issued_at_ms: i64, now_ms: i64, ttl_ms: i64) -> Self {
        if now_ms - issued_at_ms > ttl_ms {
            CredentialState::Unauthenticated
        } else {
            CredentialState::PendingCallback
        }
    }

    pub fn can_transition_to(self, next: CredentialState) -> bool {
        use CredentialState::*;
        matches!(
            (self, next),
            (Unauthenticated, PendingCallback)
                | (PendingCallback, Authenticated)
                | (PendingCallback, Unauthenticated)
                | (Authenticated, Refreshing)
                | (Authenticated, Expired)
                | (Authenticated, Revoked)
                | (Refreshing, Authenticated)
                | (Refreshing, Expired)
                | (Refreshing, Revoked)
                | (Expired, Refreshing)
                | (Expired, PendingCallback)
                | (Expired, Revoked)
                | (Revoked, PendingCallback)
        )
    }
}
