//! Meta (Facebook) Marketing API adapter
//!
//! Campaign insights are read from `act_{id}/insights` with one row per
//! campaign per day. Graph returns `paging.next` as an absolute URL; it is
//! only followed while it stays on the configured Graph host.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::config::AppConfig;
use crate::connectors::paging::{
    Page, PagingLimits, collect_pages, id_string, lenient_f64, lenient_u64, report_date,
};
use crate::connectors::trait_::AdPlatformAdapter;
use crate::error::IntegrationError;
use crate::http::{self, RetryPolicy, retry_transport};
use crate::models::credential::ProviderCredential;
use crate::models::metrics::{DateRange, RawProviderRow};
use crate::models::provider::ProviderId;

pub const GRAPH_VERSION: &str = "v19.0";
const PROVIDER: ProviderId = ProviderId::Meta;
const INSIGHT_FIELDS: &str =
    "campaign_id,campaign_name,date_start,spend,clicks,impressions,actions,action_values";

/// Action types counted as conversions.
const CONVERSION_ACTIONS: &[&str] = &["purchase", "lead", "complete_registration"];
/// Action types whose values count as revenue.
const REVENUE_ACTIONS: &[&str] = &["purchase"];

pub struct MetaAdsAdapter {
    http: reqwest::Client,
    graph_base: String,
    limits: PagingLimits,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

impl MetaAdsAdapter {
    pub fn new(http: reqwest::Client, graph_base: impl Into<String>) -> Self {
        Self {
            http,
            graph_base: graph_base.into().trim_end_matches('/').to_string(),
            limits: PagingLimits::default(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        Self::new(http, config.meta.api_base.clone())
            .with_limits(PagingLimits::from(&config.fetch))
            .with_retry(RetryPolicy::from_config(&config.http))
    }

    pub fn with_limits(mut self, limits: PagingLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn first_page_url(&self, account_id: &str, range: DateRange) -> Result<String, IntegrationError> {
        let account = account_id.strip_prefix("act_").unwrap_or(account_id);
        if account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(IntegrationError::InvalidConfiguration {
                provider: PROVIDER,
                details: format!("ad account id '{account_id}' is not numeric"),
            });
        }

        let time_range = json!({
            "since": range.start.format("%Y-%m-%d").to_string(),
            "until": range.end.format("%Y-%m-%d").to_string(),
        })
        .to_string();
        let mut url = url::Url::parse(&format!(
            "{}/{GRAPH_VERSION}/act_{account}/insights",
            self.graph_base
        ))
        .map_err(|e| IntegrationError::InvalidConfiguration {
            provider: PROVIDER,
            details: format!("graph base '{}': {e}", self.graph_base),
        })?;
        url.query_pairs_mut()
            .append_pair("level", "campaign")
            .append_pair("time_increment", "1")
            .append_pair("fields", INSIGHT_FIELDS)
            .append_pair("time_range", &time_range)
            .append_pair("limit", &self.limits.page_size.to_string());
        Ok(url.into())
    }

    async fn insights_page(
        &self,
        credential: &ProviderCredential,
        url: String,
    ) -> Result<Page<String, RawProviderRow>, IntegrationError> {
        let url = &url;
        let response: InsightsResponse = retry_transport(self.retry, || async move {
            let request = self
                .http
                .get(url)
                .bearer_auth(credential.access_token.expose());
            let response = http::send(PROVIDER, request).await?;
            http::read_json(PROVIDER, response).await
        })
        .await?;

        let items = response
            .data
            .iter()
            .map(parse_row)
            .collect::<Result<Vec<_>, _>>()?;

        let next = match response.paging.and_then(|p| p.next) {
            Some(next) if same_origin(&next, &self.graph_base) => Some(next),
            Some(next) => {
                warn!(next = %next, "Ignoring paging.next outside the Graph host");
                None
            }
            None => None,
        };
        Ok(Page { items, next })
    }
}

fn same_origin(candidate: &str, base: &str) -> bool {
    match (url::Url::parse(candidate), url::Url::parse(base)) {
        (Ok(candidate), Ok(base)) => candidate.origin() == base.origin(),
        _ => false,
    }
}

fn sum_actions(actions: Option<&Value>, wanted: &[&str]) -> Option<f64> {
    let actions = actions?.as_array()?;
    let mut matched = false;
    let mut total = 0.0;
    for action in actions {
        let kind = action["action_type"].as_str().unwrap_or_default();
        if wanted.contains(&kind) {
            matched = true;
            total += lenient_f64(action.get("value")).unwrap_or(0.0);
        }
    }
    matched.then_some(total)
}

fn parse_row(row: &Value) -> Result<RawProviderRow, IntegrationError> {
    let campaign_id = id_string(row.get("campaign_id")).ok_or_else(|| IntegrationError::MalformedResponse {
        provider: PROVIDER,
        details: "insight row without campaign_id".into(),
    })?;

    Ok(RawProviderRow {
        campaign_name: row["campaign_name"].as_str().unwrap_or(&campaign_id).to_string(),
        date: report_date(PROVIDER, row.get("date_start"))?,
        spend: lenient_f64(row.get("spend")),
        clicks: lenient_u64(row.get("clicks")),
        impressions: lenient_u64(row.get("impressions")),
        conversions: sum_actions(row.get("actions"), CONVERSION_ACTIONS),
        revenue: sum_actions(row.get("action_values"), REVENUE_ACTIONS),
        campaign_id,
    })
}

#[async_trait]
impl AdPlatformAdapter for MetaAdsAdapter {
    fn provider(&self) -> ProviderId {
        PROVIDER
    }

    #[instrument(skip(self, credential), fields(provider = "meta"))]
    async fn fetch_metrics(
        &self,
        credential: &ProviderCredential,
        account_id: &str,
        range: DateRange,
    ) -> Result<Vec<RawProviderRow>, IntegrationError> {
        range.validate()?;
        let first = self.first_page_url(account_id, range)?;
        collect_pages(PROVIDER, account_id, self.limits, first, |url| {
            self.insights_page(credential, url)
        })
        .await
    }
}
