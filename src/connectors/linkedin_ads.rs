//! LinkedIn Marketing API adapter
//!
//! `adAnalytics` finder with a `CAMPAIGN` pivot and daily granularity. Rest.li
//! 2.0 query syntax (`dateRange=(start:(...))`, `List(...)`) has to stay
//! unescaped, so the query string is assembled by hand. Analytics rows carry
//! campaign URNs only; names come from a best-effort `adCampaigns` lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use tracing::{instrument, warn};
use url::form_urlencoded::byte_serialize;

use crate::config::AppConfig;
use crate::connectors::paging::{Page, PagingLimits, collect_pages, id_string, lenient_f64, lenient_u64};
use crate::connectors::trait_::AdPlatformAdapter;
use crate::error::IntegrationError;
use crate::http::{self, RetryPolicy, retry_transport};
use crate::models::credential::ProviderCredential;
use crate::models::metrics::{DateRange, RawProviderRow};
use crate::models::provider::ProviderId;

pub const LINKEDIN_VERSION: &str = "202405";
const PROVIDER: ProviderId = ProviderId::Linkedin;
const ANALYTICS_FIELDS: &str = "pivotValues,dateRange,costInLocalCurrency,clicks,impressions,\
externalWebsiteConversions,conversionValueInLocalCurrency";

pub struct LinkedinAdsAdapter {
    http: reqwest::Client,
    api_base: String,
    limits: PagingLimits,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct Collection {
    #[serde(default)]
    elements: Vec<Value>,
    #[serde(default)]
    paging: Option<CollectionPaging>,
}

#[derive(Debug, Deserialize)]
struct CollectionPaging {
    start: Option<u32>,
    count: Option<u32>,
    total: Option<u32>,
}

impl LinkedinAdsAdapter {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            limits: PagingLimits::default(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        Self::new(http, config.linkedin.api_base.clone())
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

    async fn get_collection(&self, credential: &ProviderCredential, url: &str) -> Result<Collection, IntegrationError> {
        retry_transport(self.retry, || async move {
            let request = self
                .http
                .get(url)
                .bearer_auth(credential.access_token.expose())
                .header("LinkedIn-Version", LINKEDIN_VERSION)
                .header("X-Restli-Protocol-Version", "2.0.0");
            let response = http::send(PROVIDER, request).await?;
            http::read_json(PROVIDER, response).await
        })
        .await
    }

    fn analytics_url(&self, account_id: &str, range: DateRange, start: u32) -> String {
        let account_urn: String = byte_serialize(format!("urn:li:sponsoredAccount:{account_id}").as_bytes()).collect();
        format!(
            "{}/rest/adAnalytics?q=analytics&pivot=CAMPAIGN&timeGranularity=DAILY\
             &dateRange=(start:{},end:{})&accounts=List({account_urn})&fields={ANALYTICS_FIELDS}\
             &start={start}&count={}",
            self.api_base,
            restli_date(range.start),
            restli_date(range.end),
            self.limits.page_size,
        )
    }

    async fn analytics_page(
        &self,
        credential: &ProviderCredential,
        account_id: &str,
        range: DateRange,
        start: u32,
    ) -> Result<Page<u32, RawProviderRow>, IntegrationError> {
        let url = self.analytics_url(account_id, range, start);
        let collection = self.get_collection(credential, &url).await?;
        let items = collection
            .elements
            .iter()
            .map(parse_analytics)
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = u32::try_from(items.len()).unwrap_or(u32::MAX);
        let next = match collection.paging {
            Some(CollectionPaging {
                total: Some(total),
                start: page_start,
                count,
            }) => {
                let end = page_start
                    .unwrap_or(start)
                    .saturating_add(count.unwrap_or(fetched).max(fetched));
                // The next offset must move forward or paging stops.
                (end < total && end > start && fetched > 0).then_some(end)
            }
            _ if fetched > 0 && fetched >= self.limits.page_size => start.checked_add(fetched),
            _ => None,
        };
        Ok(Page { items, next })
    }

    /// Campaign id to name for the account. Failures are logged and leave
    /// the map empty, so rows fall back to their ids.
    async fn campaign_names(&self, credential: &ProviderCredential, account_id: &str) -> HashMap<String, String> {
        let url = format!(
            "{}/rest/adAccounts/{}/adCampaigns?q=search&pageSize=1000",
            self.api_base,
            byte_serialize(account_id.as_bytes()).collect::<String>()
        );
        match self.get_collection(credential, &url).await {
            Ok(collection) => collection
                .elements
                .iter()
                .filter_map(|c| Some((id_string(c.get("id"))?, c["name"].as_str()?.to_string())))
                .collect(),
            Err(err) => {
                warn!(account_id, error = %err, "Campaign name lookup failed; using ids as names");
                HashMap::new()
            }
        }
    }
}

fn restli_date(date: NaiveDate) -> String {
    format!("(year:{},month:{},day:{})", date.year(), date.month(), date.day())
}

fn date_from_restli(value: &Value) -> Option<NaiveDate> {
    let year = i32::try_from(value["year"].as_i64()?).ok()?;
    let month = u32::try_from(value["month"].as_u64()?).ok()?;
    let day = u32::try_from(value["day"].as_u64()?).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn malformed(details: &str) -> IntegrationError {
    IntegrationError::MalformedResponse {
        provider: PROVIDER,
        details: details.to_string(),
    }
}

/// Rows are named after their campaign id until names are resolved.
fn parse_analytics(element: &Value) -> Result<RawProviderRow, IntegrationError> {
    let urn = element["pivotValues"][0]
        .as_str()
        .ok_or_else(|| malformed("analytics row without pivotValues"))?;
    let campaign_id = urn
        .rsplit(':')
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("unrecognised campaign URN"))?
        .to_string();

    let date = date_from_restli(&element["dateRange"]["start"])
        .ok_or_else(|| malformed("analytics row without a valid dateRange.start"))?;

    Ok(RawProviderRow {
        campaign_name: campaign_id.clone(),
        campaign_id,
        date,
        spend: lenient_f64(element.get("costInLocalCurrency")),
        clicks: lenient_u64(element.get("clicks")),
        impressions: lenient_u64(element.get("impressions")),
        conversions: lenient_f64(element.get("externalWebsiteConversions")),
        revenue: lenient_f64(element.get("conversionValueInLocalCurrency")),
    })
}

#[async_trait]
impl AdPlatformAdapter for LinkedinAdsAdapter {
    fn provider(&self) -> ProviderId {
        PROVIDER
    }

    #[instrument(skip(self, credential), fields(provider = "linkedin"))]
    async fn fetch_metrics(
        &self,
        credential: &ProviderCredential,
        account_id: &str,
        range: DateRange,
    ) -> Result<Vec<RawProviderRow>, IntegrationError> {
        range.validate()?;
        if account_id.is_empty() || !account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(IntegrationError::InvalidConfiguration {
                provider: PROVIDER,
                details: format!("sponsored account id '{account_id}' is not numeric"),
            });
        }

        let mut rows = collect_pages(PROVIDER, account_id, self.limits, 0u32, |start| {
            self.analytics_page(credential, account_id, range, start)
        })
        .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let names = self.campaign_names(credential, account_id).await;
        for row in &mut rows {
            if let Some(name) = names.get(&row.campaign_id) {
                row.campaign_name = name.clone();
            }
        }
        Ok(rows)
    }
}
