//! Supported advertising platforms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::IntegrationError;

/// Advertising platform identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Google,
    Meta,
    Tiktok,
    Linkedin,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Google,
        ProviderId::Meta,
        ProviderId::Tiktok,
        ProviderId::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Google => "google",
            ProviderId::Meta => "meta",
            ProviderId::Tiktok => "tiktok",
            ProviderId::Linkedin => "linkedin",
        }
    }

    /// Human readable platform name for logs and API metadata.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Google => "Google Ads",
            ProviderId::Meta => "Meta Ads",
            ProviderId::Tiktok => "TikTok Ads",
            ProviderId::Linkedin => "LinkedIn Ads",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "google_ads" => Ok(ProviderId::Google),
            "meta" | "facebook" | "meta_ads" => Ok(ProviderId::Meta),
            "tiktok" | "tiktok_ads" => Ok(ProviderId::Tiktok),
            "linkedin" | "linkedin_ads" => Ok(ProviderId::Linkedin),
            _ => Err(IntegrationError::UnknownProvider(s.to_string())),
        }
    }
}
