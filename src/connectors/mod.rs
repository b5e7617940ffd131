//! Connectors module
//!
//! This module provides the ad-platform adapter layer including:
//! - The `AdPlatformAdapter` trait every platform implements
//! - Shared pagination with partial-failure semantics
//! - Provider metadata and the explicitly constructed adapter registry
//! - Adapters for Google Ads, Meta, TikTok and LinkedIn

pub mod google_ads;
pub mod linkedin_ads;
pub mod meta_ads;
pub mod metadata;
pub mod paging;
pub mod registry;
pub mod tiktok_ads;
pub mod trait_;

pub use google_ads::GoogleAdsAdapter;
pub use linkedin_ads::LinkedinAdsAdapter;
pub use meta_ads::MetaAdsAdapter;
pub use metadata::ProviderMetadata;
pub use registry::AdapterRegistry;
pub use tiktok_ads::TiktokAdsAdapter;
pub use trait_::{AdPlatformAdapter, DISCOVERY_WINDOW_DAYS, campaigns_from_rows};
