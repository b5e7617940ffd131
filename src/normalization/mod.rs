use crate::models::metrics::{CanonicalMetricRecord, MetricsSummary, RawProviderRow};
use crate::models::provider::ProviderId;

/// Ratios derived from raw totals. Every ratio is `0` when its denominator is `0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DerivedRatios {
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub conversion_rate: f64,
    pub cost_per_lead: f64,
    pub roas: f64,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        let value = numerator / denominator;
        if value.is_finite() { value } else { 0.0 }
    } else {
        0.0
    }
}

/// Negative, NaN and infinite inputs count as missing.
fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0)
}

impl DerivedRatios {
    pub fn compute(spend: f64, clicks: u64, impressions: u64, conversions: f64, revenue: f64) -> Self {
        let clicks = clicks as f64;
        let impressions = impressions as f64;
        Self {
            ctr: ratio(clicks, impressions) * 100.0,
            cpc: ratio(spend, clicks),
            cpm: ratio(spend, impressions) * 1000.0,
            conversion_rate: ratio(conversions, clicks) * 100.0,
            cost_per_lead: ratio(spend, conversions),
            roas: ratio(revenue, spend),
        }
    }
}

/// Map one adapter row into the canonical schema.
pub fn normalize(raw: &RawProviderRow, provider: ProviderId) -> CanonicalMetricRecord {
    let spend = finite_or_zero(raw.spend);
    let clicks = raw.clicks.unwrap_or(0);
    let impressions = raw.impressions.unwrap_or(0);
    let conversions = finite_or_zero(raw.conversions);
    let revenue = finite_or_zero(raw.revenue);
    let derived = DerivedRatios::compute(spend, clicks, impressions, conversions, revenue);

    CanonicalMetricRecord {
        provider,
        campaign_id: raw.campaign_id.clone(),
        campaign_name: raw.campaign_name.clone(),
        date: raw.date,
        spend,
        clicks,
        impressions,
        conversions,
        revenue,
        ctr: derived.ctr,
        cpc: derived.cpc,
        cpm: derived.cpm,
        conversion_rate: derived.conversion_rate,
        cost_per_lead: derived.cost_per_lead,
        roas: derived.roas,
    }
}

/// Recompute derived fields from the record's own raw fields. Applying it
/// twice gives the same record as applying it once.
pub fn renormalize(record: &CanonicalMetricRecord) -> CanonicalMetricRecord {
    let raw = RawProviderRow {
        campaign_id: record.campaign_id.clone(),
        campaign_name: record.campaign_name.clone(),
        date: record.date,
        spend: Some(record.spend),
        clicks: Some(record.clicks),
        impressions: Some(record.impressions),
        conversions: Some(record.conversions),
        revenue: Some(record.revenue),
    };
    normalize(&raw, record.provider)
}

/// Totals over `records`, with ratios derived from the totals rather than
/// averaged across rows.
pub fn summarize(records: &[CanonicalMetricRecord]) -> MetricsSummary {
    let mut summary = MetricsSummary {
        records: records.len(),
        ..Default::default()
    };
    for record in records {
        summary.spend += record.spend;
        summary.clicks += record.clicks;
        summary.impressions += record.impressions;
        summary.conversions += record.conversions;
        summary.revenue += record.revenue;
    }

    let derived = DerivedRatios::compute(
        summary.spend,
        summary.clicks,
        summary.impressions,
        summary.conversions,
        summary.revenue,
    );
    summary.ctr = derived.ctr;
    summary.cpc = derived.cpc;
    summary.cpm = derived.cpm;
    summary.conversion_rate = derived.conversion_rate;
    summary.cost_per_lead = derived.cost_per_lead;
    summary.roas = derived.roas;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(spend: f64, clicks: u64, impressions: u64, conversions: f64, revenue: f64) -> RawProviderRow {
        RawProviderRow {
            campaign_id: "cmp-1".into(),
            campaign_name: "Spring Sale".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            spend: Some(spend),
            clicks: Some(clicks),
            impressions: Some(impressions),
            conversions: Some(conversions),
            revenue: Some(revenue),
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn derives_reference_ratios() {
        let record = normalize(&raw(100.0, 50, 1000, 5.0, 400.0), ProviderId::Meta);
        assert_close(record.ctr, 5.0);
        assert_close(record.cpc, 2.0);
        assert_close(record.cpm, 100.0);
        assert_close(record.conversion_rate, 10.0);
        assert_close(record.cost_per_lead, 20.0);
        assert_close(record.roas, 4.0);
        assert_eq!(record.provider, ProviderId::Meta);
        assert_eq!(record.campaign_name, "Spring Sale");
    }

    #[test]
    fn zero_impressions_zero_ctr_and_cpm() {
        let record = normalize(&raw(10.0, 3, 0, 1.0, 0.0), ProviderId::Google);
        assert_eq!(record.ctr, 0.0);
        assert_eq!(record.cpm, 0.0);
        assert_close(record.cpc, 10.0 / 3.0);
    }

    #[test]
    fn zero_clicks_zero_cpc_and_conversion_rate() {
        let record = normalize(&raw(10.0, 0, 500, 0.0, 0.0), ProviderId::Tiktok);
        assert_eq!(record.cpc, 0.0);
        assert_eq!(record.conversion_rate, 0.0);
        assert_eq!(record.cost_per_lead, 0.0);
        assert_eq!(record.roas, 0.0);
    }

    #[test]
    fn missing_and_non_finite_inputs_default_to_zero() {
        let row = RawProviderRow {
            campaign_id: "x".into(),
            campaign_name: "x".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            spend: Some(f64::NAN),
            clicks: None,
            impressions: Some(100),
            conversions: Some(f64::INFINITY),
            revenue: Some(-3.0),
        };
        let record = normalize(&row, ProviderId::Linkedin);
        assert_eq!(record.spend, 0.0);
        assert_eq!(record.clicks, 0);
        assert_eq!(record.conversions, 0.0);
        assert_eq!(record.revenue, 0.0);
        for value in [record.ctr, record.cpc, record.cpm, record.conversion_rate, record.cost_per_lead, record.roas] {
            assert!(value.is_finite());
        }
    }

    #[test]
    fn renormalize_is_idempotent() {
        let mut record = normalize(&raw(37.5, 12, 4300, 2.0, 90.0), ProviderId::Meta);
        let once = renormalize(&record);
        assert_eq!(renormalize(&once), once);
        assert_eq!(once, record);

        // Stale derived fields are overwritten from the raw subset.
        record.ctr = 99.0;
        record.roas = -1.0;
        assert_eq!(renormalize(&record), once);
    }

    #[test]
    fn summary_ratios_come_from_totals() {
        let records = vec![
            normalize(&raw(100.0, 50, 1000, 5.0, 400.0), ProviderId::Meta),
            normalize(&raw(50.0, 0, 0, 0.0, 0.0), ProviderId::Google),
        ];
        let summary = summarize(&records);
        assert_eq!(summary.records, 2);
        assert_close(summary.spend, 150.0);
        assert_eq!(summary.clicks, 50);
        assert_close(summary.cpc, 3.0);
        assert_close(summary.ctr, 5.0);
        assert_close(summary.roas, 400.0 / 150.0);
    }

    #[test]
    fn empty_summary_is_all_zero() {
        assert_eq!(summarize(&[]), MetricsSummary::default());
    }
}
