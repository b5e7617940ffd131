//! Shared page loop for report endpoints.
//!
//! Every platform pages differently (opaque tokens, absolute URLs, offsets,
//! page numbers) but they agree on what a partial failure means: once one
//! page has been read, a failing later page ends the loop and the rows
//! gathered so far are kept. A failure on the first page fails the account.

use std::future::Future;

use chrono::NaiveDate;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::IntegrationError;
use crate::models::provider::ProviderId;

/// One page of results and the cursor for the next, if any.
#[derive(Debug)]
pub struct Page<C, T> {
    pub items: Vec<T>,
    pub next: Option<C>,
}

impl<C, T> Page<C, T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingLimits {
    pub max_pages: u32,
    pub page_size: u32,
}

impl From<&FetchConfig> for PagingLimits {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            page_size: config.page_size,
        }
    }
}

impl Default for PagingLimits {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

/// Drive `fetch_page` from `first` until it stops returning a cursor or
/// `limits.max_pages` is reached.
pub async fn collect_pages<C, T, F, Fut>(
    provider: ProviderId,
    account_id: &str,
    limits: PagingLimits,
    first: C,
    mut fetch_page: F,
) -> Result<Vec<T>, IntegrationError>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<Page<C, T>, IntegrationError>>,
{
    let mut items = Vec::new();
    let mut cursor = Some(first);
    let mut pages_read: u32 = 0;

    while let Some(current) = cursor.take() {
        if pages_read >= limits.max_pages {
            warn!(
                provider = %provider,
                account_id,
                max_pages = limits.max_pages,
                "Page limit reached; remaining pages skipped"
            );
            break;
        }

        match fetch_page(current).await {
            Ok(page) => {
                pages_read += 1;
                counter!("ads_fetch_pages_total", "provider" => provider.as_str(), "outcome" => "ok")
                    .increment(1);
                debug!(provider = %provider, account_id, page = pages_read, rows = page.items.len(), "Fetched page");
                items.extend(page.items);
                cursor = page.next;
            }
            Err(err) => {
                counter!("ads_fetch_pages_total", "provider" => provider.as_str(), "outcome" => "error")
                    .increment(1);
                if pages_read == 0 {
                    return Err(IntegrationError::ProviderFetch {
                        provider,
                        account_id: account_id.to_string(),
                        source: Box::new(err),
                    });
                }
                warn!(
                    provider = %provider,
                    account_id,
                    pages_read,
                    rows = items.len(),
                    error = %err,
                    "Page fetch failed; keeping rows already gathered"
                );
                break;
            }
        }
    }

    Ok(items)
}

/// Reporting APIs send numbers as JSON numbers or as decimal strings.
pub fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

pub fn lenient_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.max(0.0) as u64))
        }
        _ => None,
    }
}

/// Ids arrive as strings or as bare numbers.
pub fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Report dates arrive as `YYYY-MM-DD`, sometimes followed by a time.
pub fn report_date(provider: ProviderId, value: Option<&Value>) -> Result<NaiveDate, IntegrationError> {
    let raw = value.and_then(Value::as_str).unwrap_or_default();
    raw.get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .ok_or_else(|| IntegrationError::MalformedResponse {
            provider,
            details: format!("unparseable report date '{raw}'"),
        })
}
