//! TikTok Business API adapter
//!
//! Synchronous basic reports from `report/integrated/get/`, campaign level,
//! one row per campaign per day. Paged by page number until
//! `page_info.total_page`.

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

const PROVIDER: ProviderId = ProviderId::Tiktok;
const REPORT_PATH: &str = "/open_api/v1.3/report/integrated/get/";
const REPORT_METRICS: &[&str] = &[
    "campaign_name",
    "spend",
    "clicks",
    "impressions",
    "conversion",
    "total_complete_payment_rate",
];

pub struct TiktokAdsAdapter {
    http: reqwest::Client,
    api_base: String,
    limits: PagingLimits,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ReportEnvelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ReportData>,
}

#[derive(Debug, Deserialize)]
struct ReportData {
    #[serde(default)]
    list: Vec<Value>,
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    page: u32,
    total_page: u32,
}

impl TiktokAdsAdapter {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            limits: PagingLimits::default(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> Self {
        Self::new(http, config.tiktok.api_base.clone())
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

    async fn report_page(
        &self,
        credential: &ProviderCredential,
        advertiser_id: &str,
        range: DateRange,
        page: u32,
    ) -> Result<Page<u32, RawProviderRow>, IntegrationError> {
        let url = format!("{}{REPORT_PATH}", self.api_base.trim_end_matches('/'));
        let query = [
            ("advertiser_id", advertiser_id.to_string()),
            ("report_type", "BASIC".to_string()),
            ("data_level", "AUCTION_CAMPAIGN".to_string()),
            ("dimensions", json!(["campaign_id", "stat_time_day"]).to_string()),
            ("metrics", json!(REPORT_METRICS).to_string()),
            ("start_date", range.start.format("%Y-%m-%d").to_string()),
            ("end_date", range.end.format("%Y-%m-%d").to_string()),
            ("page", page.to_string()),
            ("page_size", self.limits.page_size.min(1000).to_string()),
        ];

        let (url, query) = (&url, &query);
        let (status, envelope) = retry_transport(self.retry, || async move {
            let request = self
                .http
                .get(url)
                .header("Access-Token", credential.access_token.expose())
                .query(query);
            let response = http::send(PROVIDER, request).await?;
            let status = response.status();
            let envelope: ReportEnvelope = http::read_json(PROVIDER, response).await?;
            Ok::<_, IntegrationError>((status, envelope))
        })
        .await?;

        if envelope.code != 0 {
            return Err(IntegrationError::ProviderRejected {
                provider: PROVIDER,
                status: status.as_u16(),
                error_code: Some(envelope.code.to_string()),
                description: envelope.message,
            });
        }

        let data = envelope.data.ok_or_else(|| IntegrationError::MalformedResponse {
            provider: PROVIDER,
            details: "report envelope has no data".into(),
        })?;
        let items = data
            .list
            .iter()
            .map(parse_row)
            .collect::<Result<Vec<_>, _>>()?;
        let next = data
            .page_info
            .filter(|info| info.page < info.total_page)
            .map(|info| info.page + 1);
        Ok(Page { items, next })
    }
}

fn parse_row(row: &Value) -> Result<RawProviderRow, IntegrationError> {
    let dimensions = &row["dimensions"];
    let metrics = &row["metrics"];
    let campaign_id = id_string(dimensions.get("campaign_id")).ok_or_else(|| {
        IntegrationError::MalformedResponse {
            provider: PROVIDER,
            details: "report row without dimensions.campaign_id".into(),
        }
    })?;

    Ok(RawProviderRow {
        campaign_name: metrics["campaign_name"].as_str().unwrap_or(&campaign_id).to_string(),
        date: report_date(PROVIDER, dimensions.get("stat_time_day"))?,
        spend: lenient_f64(metrics.get("spend")),
        clicks: lenient_u64(metrics.get("clicks")),
        impressions: lenient_u64(metrics.get("impressions")),
        conversions: lenient_f64(metrics.get("conversion")),
        revenue: lenient_f64(metrics.get("total_complete_payment_rate")),
        campaign_id,
    })
}

#[async_trait]
impl AdPlatformAdapter for TiktokAdsAdapter {
    fn provider(&self) -> ProviderId {
        PROVIDER
    }

    #[instrument(skip(self, credential), fields(provider = "tiktok"))]
    async fn fetch_metrics(
        &self,
        credential: &ProviderCredential,
        account_id: &str,
        range: DateRange,
    ) -> Result<Vec<RawProviderRow>, IntegrationError> {
        range.validate()?;
        collect_pages(PROVIDER, account_id, self.limits, 1u32, |page| {
            self.report_page(credential, account_id, range, page)
        })
        .await
    }
}
