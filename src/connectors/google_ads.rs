//! Google Ads adapter
//!
//! Reads daily campaign performance through `googleAds:search` with a GAQL
//! query. Pages are chained through `nextPageToken`. Cost arrives in micros
//! and int64 metrics arrive as JSON strings.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

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

pub const API_VERSION: &str = "v17";
const MICROS_PER_UNIT: f64 = 1_000_000.0;
const PROVIDER: ProviderId = ProviderId::Google;

pub struct GoogleAdsAdapter {
    http: reqwest::Client,
    api_base: String,
    developer_token: Option<String>,
    limits: PagingLimits,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
    next_page_token: Option<String>,
}

impl GoogleAdsAdapter {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, developer_token: Option<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            developer_token,
            limits: PagingLimits::default(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        Self::new(
            http,
            config.google.api_base.clone(),
            config.google_developer_token.clone(),
        )
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

    async fn search_page(
        &self,
        credential: &ProviderCredential,
        developer_token: &str,
        customer_id: &str,
        query: &str,
        page_token: String,
    ) -> Result<Page<String, RawProviderRow>, IntegrationError> {
        let url = format!(
            "{}/{API_VERSION}/customers/{customer_id}/googleAds:search",
            self.api_base.trim_end_matches('/')
        );
        let mut body = json!({ "query": query });
        if !page_token.is_empty() {
            body["pageToken"] = Value::String(page_token);
        }

        let (url, body) = (&url, &body);
        let response: SearchResponse = retry_transport(self.retry, || async move {
            let request = self
                .http
                .post(url)
                .bearer_auth(credential.access_token.expose())
                .header("developer-token", developer_token)
                .json(body);
            let response = http::send(PROVIDER, request).await?;
            http::read_json(PROVIDER, response).await
        })
        .await?;

        let items = response
            .results
            .iter()
            .map(parse_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            next: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

/// Customer ids are accepted with or without dashes but must otherwise be digits.
fn normalize_customer_id(account_id: &str) -> Result<String, IntegrationError> {
    let digits: String = account_id.chars().filter(|c| *c != '-').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(IntegrationError::InvalidConfiguration {
            provider: PROVIDER,
            details: format!("customer id '{account_id}' is not numeric"),
        });
    }
    Ok(digits)
}

fn gaql_for(range: DateRange) -> String {
    format!(
        "SELECT campaign.id, campaign.name, segments.date, metrics.cost_micros, \
         metrics.clicks, metrics.impressions, metrics.conversions, metrics.conversions_value \
         FROM campaign \
         WHERE segments.date BETWEEN '{}' AND '{}' \
         ORDER BY segments.date",
        range.start.format("%Y-%m-%d"),
        range.end.format("%Y-%m-%d"),
    )
}

fn parse_row(result: &Value) -> Result<RawProviderRow, IntegrationError> {
    let campaign = &result["campaign"];
    let metrics = &result["metrics"];
    let campaign_id = id_string(campaign.get("id")).ok_or_else(|| IntegrationError::MalformedResponse {
        provider: PROVIDER,
        details: "search result without campaign.id".into(),
    })?;

    Ok(RawProviderRow {
        campaign_name: campaign["name"].as_str().unwrap_or(&campaign_id).to_string(),
        date: report_date(PROVIDER, result["segments"].get("date"))?,
        spend: lenient_f64(metrics.get("costMicros")).map(|micros| micros / MICROS_PER_UNIT),
        clicks: lenient_u64(metrics.get("clicks")),
        impressions: lenient_u64(metrics.get("impressions")),
        conversions: lenient_f64(metrics.get("conversions")),
        revenue: lenient_f64(metrics.get("conversionsValue")),
        campaign_id,
    })
}

#[async_trait]
impl AdPlatformAdapter for GoogleAdsAdapter {
    fn provider(&self) -> ProviderId {
        PROVIDER
    }

    #[instrument(skip(self, credential), fields(provider = "google"))]
    async fn fetch_metrics(
        &self,
        credential: &ProviderCredential,
        account_id: &str,
        range: DateRange,
    ) -> Result<Vec<RawProviderRow>, IntegrationError> {
        range.validate()?;
        let developer_token = self
            .developer_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(IntegrationError::CredentialsNotConfigured { provider: PROVIDER })?;
        let customer_id = normalize_customer_id(account_id)?;
        let query = gaql_for(range);

        collect_pages(PROVIDER, account_id, self.limits, String::new(), |token| {
            self.search_page(credential, developer_token, &customer_id, &query, token)
        })
        .await
    }
}
