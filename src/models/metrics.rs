//! Campaign discovery and performance records.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::credential::CredentialKey;
use super::provider::ProviderId;
use crate::error::IntegrationError;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, IntegrationError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// The `days` calendar days ending on `end`, inclusive.
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn validate(&self) -> Result<(), IntegrationError> {
        if self.start > self.end {
            return Err(IntegrationError::InvalidDateRange(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Lightweight campaign record used to enumerate campaigns before fetching
/// per-campaign metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CampaignOverview {
    pub id: String,
    pub name: String,
    /// Provider-side reference (ad account or customer id) the campaign lives under.
    pub reference_id: String,
}

/// Provider-neutral row every adapter produces. Missing numbers stay `None`
/// until normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawProviderRow {
    pub campaign_id: String,
    pub campaign_name: String,
    pub date: NaiveDate,
    pub spend: Option<f64>,
    pub clicks: Option<u64>,
    pub impressions: Option<u64>,
    pub conversions: Option<f64>,
    pub revenue: Option<f64>,
}

/// Canonical daily metrics for one campaign. Derived ratios are always
/// recomputed from the raw fields and are `0` when their denominator is `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CanonicalMetricRecord {
    pub provider: ProviderId,
    pub campaign_id: String,
    pub campaign_name: String,
    pub date: NaiveDate,
    pub spend: f64,
    pub clicks: u64,
    pub impressions: u64,
    pub conversions: f64,
    pub revenue: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub conversion_rate: f64,
    pub cost_per_lead: f64,
    pub roas: f64,
}

/// Totals over a set of canonical records, with ratios derived from the totals.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct MetricsSummary {
    pub records: usize,
    pub spend: f64,
    pub clicks: u64,
    pub impressions: u64,
    pub conversions: f64,
    pub revenue: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub conversion_rate: f64,
    pub cost_per_lead: f64,
    pub roas: f64,
}

/// An ad account a user has connected, and the credential that reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectedAccount {
    pub provider: ProviderId,
    pub account_id: String,
    pub credential_ref: CredentialKey,
}

/// One account that contributed no records to an aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccountFailure {
    pub provider: ProviderId,
    pub account_id: String,
    pub code: String,
    pub message: String,
}

/// Result of a multi-account aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregatedMetrics {
    pub records: Vec<CanonicalMetricRecord>,
    pub failures: Vec<AccountFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn trailing_window_is_inclusive() {
        let range = DateRange::trailing(date("2024-03-30"), 30);
        assert_eq!(range.start, date("2024-03-01"));
        assert!(range.contains(date("2024-03-01")));
        assert!(range.contains(date("2024-03-30")));
        assert!(!range.contains(date("2024-02-29")));
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(DateRange::new(date("2024-03-02"), date("2024-03-01")).is_err());
        assert!(DateRange::new(date("2024-03-01"), date("2024-03-01")).is_ok());
    }
}
