//! Adapter trait implemented once per advertising platform.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::IntegrationError;
use crate::models::credential::ProviderCredential;
use crate::models::metrics::{CampaignOverview, DateRange, RawProviderRow};
use crate::models::provider::ProviderId;

/// Campaigns are discovered from this many days of reporting data. A
/// campaign with no rows in the window is not listed.
pub const DISCOVERY_WINDOW_DAYS: u32 = 30;

#[async_trait]
pub trait AdPlatformAdapter: Send + Sync {
    fn provider(&self) -> ProviderId;

    /// Enumerate campaigns under `account_id`, in first-seen order.
    async fn list_campaigns(
        &self,
        credential: &ProviderCredential,
        account_id: &str,
    ) -> Result<Vec<CampaignOverview>, IntegrationError> {
        let window = DateRange::trailing(Utc::now().date_naive(), DISCOVERY_WINDOW_DAYS);
        let rows = self.fetch_metrics(credential, account_id, window).await?;
        Ok(campaigns_from_rows(account_id, &rows))
    }

    /// Daily campaign rows for `range`, in provider order. Pages until the
    /// report is exhausted.
    async fn fetch_metrics(
        &self,
        credential: &ProviderCredential,
        account_id: &str,
        range: DateRange,
    ) -> Result<Vec<RawProviderRow>, IntegrationError>;
}

/// Distinct campaigns in the order they first appear.
pub fn campaigns_from_rows(account_id: &str, rows: &[RawProviderRow]) -> Vec<CampaignOverview> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|row| seen.insert(row.campaign_id.as_str()))
        .map(|row| CampaignOverview {
            id: row.campaign_id.clone(),
            name: row.campaign_name.clone(),
            reference_id: account_id.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(id: &str, name: &str, day: u32) -> RawProviderRow {
        RawProviderRow {
            campaign_id: id.into(),
            campaign_name: name.into(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn dedupes_preserving_first_seen_order() {
        let rows = vec![
            row("c2", "Spring", 1),
            row("c1", "Brand", 1),
            row("c2", "Spring", 2),
            row("c3", "Retarget", 2),
            row("c1", "Brand", 3),
        ];
        let campaigns = campaigns_from_rows("act_9", &rows);
        let ids: Vec<_> = campaigns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1", "c3"]);
        assert!(campaigns.iter().all(|c| c.reference_id == "act_9"));
    }
}
