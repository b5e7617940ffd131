//! # Token Refresh Service
//!
//! Background task that periodically scans stored credentials and refreshes
//! access tokens nearing expiry. Also exposes on-demand refresh for callers
//! that just saw a provider reject an access token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::error::IntegrationError;
use crate::locks::KeyedMutex;
use crate::models::credential::{CredentialKey, CredentialState, ProviderCredential, SecretString};
use crate::models::provider::ProviderId;
use crate::oauth::exchange::{TokenExchanger, refresh_secret};
use crate::store::CredentialStore;

/// Background token refresh service
#[derive(Clone)]
pub struct TokenRefreshService {
    config: Arc<AppConfig>,
    exchangers: HashMap<ProviderId, Arc<dyn TokenExchanger>>,
    store: Arc<dyn CredentialStore>,
    locks: Arc<KeyedMutex<CredentialKey>>,
}

/// Classification of token refresh errors for appropriate handling
#[derive(Debug, PartialEq, Eq)]
pub enum RefreshErrorClassification {
    /// The grant is gone (e.g. invalid_grant); the credential is deleted
    Permanent,
    /// Network issues and provider hiccups; retried next tick
    Transient,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed {
        access_token_expires_at: Option<DateTime<Utc>>,
    },
    /// Another refresh already moved the expiry out of the window.
    NotDue,
    /// No usable refresh secret; the credential stays until it expires.
    NotRefreshable,
    /// The provider revoked the grant and the credential was deleted.
    Revoked,
}

impl RefreshOutcome {
    /// Lifecycle state the credential settled in; `None` when it was left as is.
    pub fn state(&self) -> Option<CredentialState> {
        match self {
            RefreshOutcome::Refreshed { .. } | RefreshOutcome::NotDue => {
                Some(CredentialState::Authenticated)
            }
            RefreshOutcome::Revoked => Some(CredentialState::Revoked),
            RefreshOutcome::NotRefreshable => None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub due: u64,
    pub refreshed: u64,
    pub skipped: u64,
    pub revoked: u64,
    pub failed: u64,
}

impl TokenRefreshService {
    pub fn new(
        config: Arc<AppConfig>,
        exchangers: HashMap<ProviderId, Arc<dyn TokenExchanger>>,
        store: Arc<dyn CredentialStore>,
        locks: Arc<KeyedMutex<CredentialKey>>,
    ) -> Self {
        Self {
            config,
            exchangers,
            store,
            locks,
        }
    }

    /// Run the token refresh loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting token refresh service");
        let tick_interval = TokioDuration::from_secs(self.config.token_refresh.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Token refresh tick failed");
                    }
                    histogram!("ads_token_refresh_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// Refresh every credential expiring within the lead time, bounded by
    /// the configured concurrency.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<RefreshStats, IntegrationError> {
        let due_before = self.due_before(Utc::now());
        let due = self.store.list_expiring(due_before).await?;
        let mut stats = RefreshStats {
            due: due.len() as u64,
            ..Default::default()
        };
        debug!(
            due = due.len(),
            lead_time_seconds = self.config.token_refresh.lead_time_seconds,
            "Found credentials due for token refresh"
        );

        let semaphore = Arc::new(Semaphore::new(
            self.config.token_refresh.concurrency.max(1) as usize,
        ));
        let mut tasks = JoinSet::new();
        for credential in due {
            let service = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| IntegrationError::Cancelled)?;
                let jitter = service.compute_jitter();
                if jitter > 0 {
                    sleep(TokioDuration::from_millis(jitter)).await;
                }
                service.refresh_if_due(&credential.key(), due_before).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(RefreshOutcome::Refreshed { .. })) => stats.refreshed += 1,
                Ok(Ok(RefreshOutcome::Revoked)) => stats.revoked += 1,
                Ok(Ok(RefreshOutcome::NotDue | RefreshOutcome::NotRefreshable)) => stats.skipped += 1,
                Ok(Err(e)) => {
                    stats.failed += 1;
                    debug!(error = %e, "Credential refresh failed");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(error = %e, "Refresh task panicked or was cancelled");
                }
            }
        }

        info!(
            due = stats.due,
            refreshed = stats.refreshed,
            skipped = stats.skipped,
            revoked = stats.revoked,
            failed = stats.failed,
            "Token refresh tick completed"
        );
        Ok(stats)
    }

    /// On-demand refresh of one credential, serialized with every other
    /// grant for the same key.
    pub async fn refresh_now(&self, key: &CredentialKey) -> Result<RefreshOutcome, IntegrationError> {
        self.refresh_if_due(key, self.due_before(Utc::now())).await
    }

    fn due_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.config.token_refresh.lead_time_seconds as i64)
    }

    #[instrument(skip_all, fields(provider = %key.provider, user_id = %key.user_id))]
    async fn refresh_if_due(
        &self,
        key: &CredentialKey,
        due_before: DateTime<Utc>,
    ) -> Result<RefreshOutcome, IntegrationError> {
        let _guard = self.locks.lock(key.clone()).await;

        // Re-read under the lock: a refresh that finished while we waited
        // has already moved the expiry.
        let credential = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| IntegrationError::CredentialNotFound(key.clone()))?;
        if !credential
            .access_token_expires_at
            .is_some_and(|at| at <= due_before)
        {
            return Ok(RefreshOutcome::NotDue);
        }

        let now = Utc::now();
        let Some(secret) = refreshable_secret(&credential, now) else {
            debug!("Credential has no usable refresh secret");
            return Ok(RefreshOutcome::NotRefreshable);
        };
        let exchanger = self
            .exchangers
            .get(&key.provider)
            .ok_or(IntegrationError::CredentialsNotConfigured {
                provider: key.provider,
            })?;

        let observed = CredentialState::observe(Some(&credential), now);
        let refreshing = transition(observed, CredentialState::Refreshing);

        let started = std::time::Instant::now();
        match exchanger.refresh(secret).await {
            Ok(grant) => {
                let refreshed = grant.merge_into(&credential, now);
                if let Err(e) = self.store.persist(&refreshed).await {
                    transition(refreshing, CredentialState::observe(Some(&credential), Utc::now()));
                    return Err(e);
                }
                transition(refreshing, CredentialState::Authenticated);
                histogram!("ads_token_refresh_latency_ms")
                    .record(started.elapsed().as_secs_f64() * 1_000.0);
                counter!("ads_token_refresh_total", "provider" => key.provider.as_str(), "outcome" => "success")
                    .increment(1);
                info!(
                    expires_at = ?refreshed.access_token_expires_at,
                    "Refreshed provider credential"
                );
                Ok(RefreshOutcome::Refreshed {
                    access_token_expires_at: refreshed.access_token_expires_at,
                })
            }
            Err(e) => match classify_refresh_error(&e) {
                RefreshErrorClassification::Permanent => {
                    warn!(error = %e, "Provider revoked the grant, deleting credential");
                    self.store.delete(key).await?;
                    transition(refreshing, CredentialState::Revoked);
                    counter!("ads_token_refresh_total", "provider" => key.provider.as_str(), "outcome" => "revoked")
                        .increment(1);
                    Ok(RefreshOutcome::Revoked)
                }
                classification => {
                    warn!(error = %e, ?classification, "Token refresh failed, will retry later");
                    transition(refreshing, CredentialState::observe(Some(&credential), Utc::now()));
                    let outcome = if classification == RefreshErrorClassification::RateLimited {
                        "rate_limited"
                    } else {
                        "transient"
                    };
                    counter!("ads_token_refresh_total", "provider" => key.provider.as_str(), "outcome" => outcome)
                        .increment(1);
                    Err(e)
                }
            },
        }
    }

    /// Jitter in milliseconds, up to `lead_time * jitter_factor`
    fn compute_jitter(&self) -> u64 {
        let factor = self.config.token_refresh.jitter_factor;
        if factor <= 0.0 {
            return 0;
        }
        let max_delay_ms = (self.config.token_refresh.lead_time_seconds as f64 * factor * 1_000.0) as u64;
        rand::thread_rng().gen_range(0..=max_delay_ms)
    }
}

fn transition(from: CredentialState, to: CredentialState) -> CredentialState {
    if from.can_transition_to(to) {
        debug!(?from, ?to, "Credential state changed");
    } else {
        warn!(?from, ?to, "Credential took an unexpected state transition");
    }
    to
}

fn refreshable_secret(
    credential: &ProviderCredential,
    now: DateTime<Utc>,
) -> Option<&SecretString> {
    match credential.provider {
        // Meta re-exchanges a still-valid access token.
        ProviderId::Meta => refresh_secret(credential).filter(|_| !credential.is_access_expired(now)),
        _ if credential.can_refresh(now) => refresh_secret(credential),
        _ => None,
    }
}

/// Classify token refresh errors for appropriate handling strategy
pub fn classify_refresh_error(err: &IntegrationError) -> RefreshErrorClassification {
    let IntegrationError::ProviderRejected {
        status,
        error_code,
        description,
        ..
    } = err
    else {
        return RefreshErrorClassification::Transient;
    };

    let text = format!(
        "{} {}",
        error_code.as_deref().unwrap_or_default(),
        description.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    if text.contains("invalid_grant")
        || text.contains("invalid_client")
        || text.contains("unauthorized_client")
        || text.contains("unsupported_grant_type")
        || text.contains("access_denied")
        || text.contains("revoked")
        || text.contains("expired")
    {
        return RefreshErrorClassification::Permanent;
    }

    if *status == 429
        || text.contains("rate_limit")
        || text.contains("too_many_requests")
        || text.contains("too frequent")
        || text.contains("temporarily_unavailable")
    {
        return RefreshErrorClassification::RateLimited;
    }

    if matches!(status, 400 | 401 | 403) {
        return RefreshErrorClassification::Permanent;
    }
    RefreshErrorClassification::Transient
}
