//! # Integration Orchestrator
//!
//! [`AdsManager`] aggregates canonical metrics across many connected ad
//! accounts. Each account runs as its own task on a `JoinSet`, gated by a
//! per-provider semaphore. One account failing never affects its siblings:
//! the failure is logged, counted, and reported next to the records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::connectors::{AdPlatformAdapter, AdapterRegistry};
use crate::error::IntegrationError;
use crate::models::metrics::{
    AccountFailure, AggregatedMetrics, CanonicalMetricRecord, ConnectedAccount, DateRange,
    RawProviderRow,
};
use crate::models::provider::ProviderId;
use crate::normalization::normalize;
use crate::store::CredentialStore;

pub struct AdsManager {
    registry: AdapterRegistry,
    store: Arc<dyn CredentialStore>,
    permits: HashMap<ProviderId, Arc<Semaphore>>,
}

type AccountOutcome = Result<Vec<CanonicalMetricRecord>, IntegrationError>;

impl AdsManager {
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<dyn CredentialStore>,
        concurrency_per_provider: usize,
    ) -> Self {
        let permits = ProviderId::ALL
            .into_iter()
            .map(|p| (p, Arc::new(Semaphore::new(concurrency_per_provider.max(1)))))
            .collect();
        Self {
            registry,
            store,
            permits,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        registry: AdapterRegistry,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::new(registry, store, config.fetch.concurrency_per_provider)
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Flat list of canonical records over every account that succeeded.
    pub async fn get_all_metrics(
        &self,
        accounts: &[ConnectedAccount],
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<CanonicalMetricRecord>, IntegrationError> {
        Ok(self
            .get_all_metrics_detailed(accounts, range, cancel)
            .await?
            .records)
    }

    /// Records in account input order, plus one [`AccountFailure`] per
    /// account that contributed nothing. Accounts whose provider has no
    /// registered adapter are skipped.
    #[instrument(skip_all, fields(accounts = accounts.len(), start = %range.start, end = %range.end))]
    pub async fn get_all_metrics_detailed(
        &self,
        accounts: &[ConnectedAccount],
        range: DateRange,
        cancel: &CancellationToken,
    ) -> Result<AggregatedMetrics, IntegrationError> {
        range.validate()?;
        if cancel.is_cancelled() {
            return Err(IntegrationError::Cancelled);
        }
        let started = Instant::now();

        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<Option<AccountOutcome>> = Vec::with_capacity(accounts.len());
        let mut scheduled: Vec<&ConnectedAccount> = Vec::with_capacity(accounts.len());

        for account in accounts {
            let Some(adapter) = self.registry.get(account.provider) else {
                warn!(
                    provider = %account.provider,
                    account_id = %account.account_id,
                    "No adapter registered for provider, skipping account"
                );
                continue;
            };
            let index = scheduled.len();
            scheduled.push(account);
            outcomes.push(None);

            let store = self.store.clone();
            let permits = self.permits[&account.provider].clone();
            let account = account.clone();
            tasks.spawn(async move {
                (index, fetch_account(adapter, store, permits, account, range).await)
            });
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!("Metric aggregation cancelled");
                    return Err(IntegrationError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                    Some(Err(e)) => error!(error = %e, "Account fetch task failed"),
                },
            }
        }

        let mut aggregated = AggregatedMetrics::default();
        for (account, outcome) in scheduled.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(records)) => aggregated.records.extend(records),
                Some(Err(e)) => aggregated.failures.push(record_failure(account, &e)),
                None => aggregated.failures.push(AccountFailure {
                    provider: account.provider,
                    account_id: account.account_id.clone(),
                    code: "TASK_FAILED".into(),
                    message: "account fetch task did not complete".into(),
                }),
            }
        }

        let elapsed = started.elapsed();
        histogram!("ads_aggregate_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
        info!(
            records = aggregated.records.len(),
            failed_accounts = aggregated.failures.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Metric aggregation completed"
        );
        Ok(aggregated)
    }
}

fn record_failure(account: &ConnectedAccount, err: &IntegrationError) -> AccountFailure {
    warn!(
        provider = %account.provider,
        account_id = %account.account_id,
        code = err.code(),
        error = %err,
        "Account excluded from aggregation"
    );
    counter!("ads_account_fetch_failures_total", "provider" => account.provider.as_str())
        .increment(1);
    AccountFailure {
        provider: account.provider,
        account_id: account.account_id.clone(),
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

/// Discover campaigns, fetch the range once and emit rows grouped by
/// campaign in discovery order. Rows of campaigns outside the discovery
/// window are dropped.
async fn fetch_account(
    adapter: Arc<dyn AdPlatformAdapter>,
    store: Arc<dyn CredentialStore>,
    permits: Arc<Semaphore>,
    account: ConnectedAccount,
    range: DateRange,
) -> AccountOutcome {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| IntegrationError::Cancelled)?;

    if account.credential_ref.provider != account.provider {
        return Err(IntegrationError::InvalidConfiguration {
            provider: account.provider,
            details: format!(
                "credential {} belongs to another provider",
                account.credential_ref
            ),
        });
    }
    let credential = store
        .get(&account.credential_ref)
        .await?
        .ok_or_else(|| IntegrationError::CredentialNotFound(account.credential_ref.clone()))?;

    let campaigns = adapter
        .list_campaigns(&credential, &account.account_id)
        .await?;
    if campaigns.is_empty() {
        debug!(provider = %account.provider, account_id = %account.account_id, "No campaigns discovered");
        return Ok(Vec::new());
    }

    let rows = adapter
        .fetch_metrics(&credential, &account.account_id, range)
        .await?;
    let mut by_campaign: HashMap<String, Vec<RawProviderRow>> = HashMap::new();
    for row in rows {
        by_campaign.entry(row.campaign_id.clone()).or_default().push(row);
    }

    let records = campaigns
        .iter()
        .filter_map(|campaign| by_campaign.remove(&campaign.id))
        .flatten()
        .map(|row| normalize(&row, account.provider))
        .collect::<Vec<_>>();

    if !by_campaign.is_empty() {
        debug!(
            provider = %account.provider,
            account_id = %account.account_id,
            undiscovered_campaigns = by_campaign.len(),
            "Dropped rows for campaigns outside the discovery window"
        );
    }
    Ok(records)
}
