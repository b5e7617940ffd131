//! Connect and callback orchestration for the OAuth round trip.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::error::IntegrationError;
use crate::locks::KeyedMutex;
use crate::models::credential::{CredentialKey, CredentialState};
use crate::models::provider::ProviderId;
use crate::models::sync_job::{SyncJobRequest, SyncJobType};
use crate::store::{CredentialStore, SyncJobQueue};

use super::authorize::{build_authorize_url, uses_pkce};
use super::exchange::TokenExchanger;
use super::pkce::PkcePair;
use super::state::{OAuthFlowContext, StateCodec, generate_nonce};

/// Where to send the user, plus the nonce the caller must keep in its session
/// and present again at callback time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthorizationRedirect {
    pub provider: ProviderId,
    pub authorize_url: String,
    pub flow_nonce: String,
    pub expires_at_epoch_ms: i64,
}

/// Result of a completed callback.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionEstablished {
    pub credential: CredentialKey,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_path: Option<String>,
}

/// Current lifecycle state of one binding.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionStatus {
    pub credential: CredentialKey,
    pub state: CredentialState,
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

pub struct OAuthFlowService {
    config: Arc<AppConfig>,
    codec: Arc<StateCodec>,
    exchangers: HashMap<ProviderId, Arc<dyn TokenExchanger>>,
    store: Arc<dyn CredentialStore>,
    queue: Arc<dyn SyncJobQueue>,
    locks: Arc<KeyedMutex<CredentialKey>>,
}

impl OAuthFlowService {
    pub fn new(
        config: Arc<AppConfig>,
        codec: Arc<StateCodec>,
        exchangers: HashMap<ProviderId, Arc<dyn TokenExchanger>>,
        store: Arc<dyn CredentialStore>,
        queue: Arc<dyn SyncJobQueue>,
        locks: Arc<KeyedMutex<CredentialKey>>,
    ) -> Self {
        Self {
            config,
            codec,
            exchangers,
            store,
            queue,
            locks,
        }
    }

    /// Mint a flow context and the provider authorization URL carrying it.
    #[instrument(skip_all, fields(provider = %provider, user_id = %user_id))]
    pub fn begin(
        &self,
        user_id: &str,
        provider: ProviderId,
        workspace_client_id: Option<String>,
        return_path: Option<String>,
    ) -> Result<AuthorizationRedirect, IntegrationError> {
        let pkce = PkcePair::generate();
        let context = OAuthFlowContext {
            flow_nonce: generate_nonce(),
            user_id: user_id.to_string(),
            provider,
            workspace_client_id,
            return_path,
            pkce_verifier: pkce.verifier,
            issued_at_epoch_ms: self.codec.now_ms(),
        };
        let state = self.codec.encode(&context)?;

        let challenge = uses_pkce(provider).then_some(pkce.challenge.as_str());
        let url = build_authorize_url(
            provider,
            self.config.provider(provider),
            &self.config.redirect_uri(provider),
            &state,
            challenge,
        )?;

        info!("Issued authorization redirect");
        Ok(AuthorizationRedirect {
            provider,
            authorize_url: url.into(),
            expires_at_epoch_ms: context.issued_at_epoch_ms + self.codec.ttl_ms(),
            flow_nonce: context.flow_nonce,
        })
    }

    /// Validate the state, exchange the code, persist the credential and
    /// enqueue the initial backfill. Nothing is persisted unless the exchange
    /// succeeds.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn complete_callback(
        &self,
        provider: ProviderId,
        code: &str,
        state: &str,
        expected_nonce: &str,
    ) -> Result<ConnectionEstablished, IntegrationError> {
        let context = self.codec.decode_for_callback(state, expected_nonce, provider)?;
        if code.trim().is_empty() {
            return Err(IntegrationError::InvalidState {
                reason: "missing authorization code",
            });
        }

        let exchanger = self
            .exchangers
            .get(&provider)
            .ok_or(IntegrationError::CredentialsNotConfigured { provider })?;
        let key = CredentialKey::new(
            context.user_id.clone(),
            provider,
            context.workspace_client_id.clone(),
        );

        let credential = {
            let _guard = self.locks.lock(key.clone()).await;
            let verifier = uses_pkce(provider).then(|| context.pkce_verifier.expose());
            let grant = exchanger
                .exchange(code, &self.config.redirect_uri(provider), verifier)
                .await?;
            let credential = grant.into_credential(&key, Utc::now());
            self.store.persist(&credential).await?;
            credential
        };

        info!(
            user_id = %key.user_id,
            workspace_client_id = ?key.workspace_client_id,
            "Connected provider account"
        );

        let queue = Arc::clone(&self.queue);
        let request = SyncJobRequest {
            user_id: key.user_id.clone(),
            provider,
            workspace_client_id: key.workspace_client_id.clone(),
            job_type: SyncJobType::InitialBackfill,
        };
        tokio::spawn(async move {
            if let Err(err) = queue.enqueue(request).await {
                warn!(provider = %provider, error = %err, "Failed to enqueue initial backfill");
            }
        });

        Ok(ConnectionEstablished {
            credential: key,
            scopes: credential.scopes.iter().cloned().collect(),
            bound_account_id: credential.bound_account_id.clone(),
            return_path: context.return_path,
        })
    }

    /// Lifecycle state derived from whatever the store holds for `key`.
    pub async fn status(&self, key: &CredentialKey) -> Result<ConnectionStatus, IntegrationError> {
        let credential = self.store.get(key).await?;
        Ok(ConnectionStatus {
            credential: key.clone(),
            state: CredentialState::observe(credential.as_ref(), Utc::now()),
            scopes: credential
                .as_ref()
                .map(|c| c.scopes.iter().cloned().collect())
                .unwrap_or_default(),
            bound_account_id: credential.as_ref().and_then(|c| c.bound_account_id.clone()),
            access_token_expires_at: credential.and_then(|c| c.access_token_expires_at),
        })
    }

    /// Drop the stored credential. Serialized with any in-flight grant for
    /// the same key.
    #[instrument(skip_all, fields(provider = %key.provider))]
    pub async fn disconnect(&self, key: &CredentialKey) -> Result<(), IntegrationError> {
        let _guard = self.locks.lock(key.clone()).await;
        if self.store.delete(key).await? {
            info!(user_id = %key.user_id, "Disconnected provider account");
            Ok(())
        } else {
            Err(IntegrationError::CredentialNotFound(key.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoKey;
    use crate::models::credential::SecretString;
    use crate::oauth::exchange::TokenGrant;
    use crate::oauth::state::tests::FixedClock;
    use crate::store::{InMemoryCredentialStore, InMemorySyncJobQueue};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    const T0: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct RecordingExchanger {
        calls: Mutex<Vec<(String, Option<String>)>>,
        omit_access_token: bool,
    }

    #[async_trait]
    impl TokenExchanger for RecordingExchanger {
        fn provider(&self) -> ProviderId {
            ProviderId::Google
        }

        async fn exchange(
            &self,
            code: &str,
            _redirect_uri: &str,
            pkce_verifier: Option<&str>,
        ) -> Result<TokenGrant, IntegrationError> {
            self.calls
                .lock()
                .unwrap()
                .push((code.to_string(), pkce_verifier.map(str::to_string)));
            if self.omit_access_token {
                return Err(IntegrationError::MalformedResponse {
                    provider: ProviderId::Google,
                    details: "token response has no access_token".into(),
                });
            }
            Ok(TokenGrant {
                access_token: "ya29.fresh".into(),
                refresh_token: Some("1//refresh".into()),
                expires_in_seconds: Some(3600),
                refresh_expires_in_seconds: None,
                granted_scopes: BTreeSet::from(["adwords".to_string()]),
                bound_account_id: None,
            })
        }

        async fn refresh(&self, _token: &SecretString) -> Result<TokenGrant, IntegrationError> {
            unreachable!("callbacks never refresh")
        }
    }

    struct Harness {
        service: OAuthFlowService,
        clock: Arc<FixedClock>,
        exchanger: Arc<RecordingExchanger>,
        store: Arc<InMemoryCredentialStore>,
        queue: Arc<InMemorySyncJobQueue>,
    }

    fn harness(exchanger: RecordingExchanger) -> Harness {
        let mut config = AppConfig::default();
        config.google.client_id = Some("client-id".into());
        config.google.client_secret = Some("client-secret".into());

        let clock = FixedClock::at(T0);
        let codec = StateCodec::with_clock(CryptoKey::new(vec![3u8; 32]).unwrap(), clock.clone());
        let exchanger = Arc::new(exchanger);
        let store = InMemoryCredentialStore::new();
        let queue = InMemorySyncJobQueue::new();
        let mut exchangers: HashMap<ProviderId, Arc<dyn TokenExchanger>> = HashMap::new();
        exchangers.insert(ProviderId::Google, exchanger.clone());

        let service = OAuthFlowService::new(
            Arc::new(config),
            Arc::new(codec),
            exchangers,
            store.clone(),
            queue.clone(),
            KeyedMutex::new(),
        );
        Harness {
            service,
            clock,
            exchanger,
            store,
            queue,
        }
    }

    fn state_of(redirect: &AuthorizationRedirect) -> String {
        Url::parse(&redirect.authorize_url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn wait_for_jobs(queue: &InMemorySyncJobQueue, n: usize) {
        for _ in 0..50 {
            if queue.jobs().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn callback_persists_and_enqueues_backfill() {
        let h = harness(RecordingExchanger::default());
        let redirect = h
            .service
            .begin("user-1", ProviderId::Google, Some("client-a".into()), Some("/clients/a".into()))
            .unwrap();
        assert_eq!(redirect.expires_at_epoch_ms, T0 + 300_000);

        let outcome = h
            .service
            .complete_callback(ProviderId::Google, "auth-code", &state_of(&redirect), &redirect.flow_nonce)
            .await
            .unwrap();
        assert_eq!(outcome.return_path.as_deref(), Some("/clients/a"));

        let key = CredentialKey::new("user-1", ProviderId::Google, Some("client-a".into()));
        let stored = h.store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose(), "ya29.fresh");

        // The PKCE verifier sealed in the state reaches the token endpoint.
        let calls = h.exchanger.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let verifier = calls[0].1.clone().unwrap();
        let challenge = Url::parse(&redirect.authorize_url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code_challenge")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(crate::oauth::pkce::challenge_for(&verifier), challenge);

        wait_for_jobs(&h.queue, 1).await;
        let jobs = h.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, SyncJobType::InitialBackfill);
        assert_eq!(jobs[0].workspace_client_id.as_deref(), Some("client-a"));
    }

    #[tokio::test]
    async fn failed_exchange_persists_nothing() {
        let h = harness(RecordingExchanger {
            omit_access_token: true,
            ..Default::default()
        });
        let redirect = h.service.begin("user-1", ProviderId::Google, None, None).unwrap();

        let result = h
            .service
            .complete_callback(ProviderId::Google, "code", &state_of(&redirect), &redirect.flow_nonce)
            .await;
        assert!(matches!(result, Err(IntegrationError::MalformedResponse { .. })));
        assert!(h.store.is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn wrong_nonce_never_reaches_provider() {
        let h = harness(RecordingExchanger::default());
        let redirect = h.service.begin("user-1", ProviderId::Google, None, None).unwrap();

        let result = h
            .service
            .complete_callback(ProviderId::Google, "code", &state_of(&redirect), "someone-elses-nonce")
            .await;
        assert!(matches!(result, Err(IntegrationError::InvalidState { .. })));
        assert!(h.exchanger.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_callback_is_rejected_without_second_exchange() {
        let h = harness(RecordingExchanger::default());
        let redirect = h.service.begin("user-1", ProviderId::Google, None, None).unwrap();
        let state = state_of(&redirect);

        h.service
            .complete_callback(ProviderId::Google, "code-1", &state, &redirect.flow_nonce)
            .await
            .unwrap();
        let replay = h
            .service
            .complete_callback(ProviderId::Google, "code-2", &state, &redirect.flow_nonce)
            .await;

        assert!(matches!(
            replay,
            Err(IntegrationError::InvalidState { reason: "already used" })
        ));
        let calls = h.exchanger.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "code-1");
    }

    #[tokio::test]
    async fn stale_callback_is_expired() {
        let h = harness(RecordingExchanger::default());
        let redirect = h.service.begin("user-1", ProviderId::Google, None, None).unwrap();
        h.clock.advance(5 * 60 * 1000 + 1_000);

        let result = h
            .service
            .complete_callback(ProviderId::Google, "code", &state_of(&redirect), &redirect.flow_nonce)
            .await;
        assert!(matches!(result, Err(IntegrationError::ExpiredState { .. })));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_provider_cannot_begin() {
        let h = harness(RecordingExchanger::default());
        assert!(matches!(
            h.service.begin("user-1", ProviderId::Linkedin, None, None),
            Err(IntegrationError::CredentialsNotConfigured {
                provider: ProviderId::Linkedin
            })
        ));
    }

    #[tokio::test]
    async fn disconnect_removes_credential() {
        let h = harness(RecordingExchanger::default());
        let redirect = h.service.begin("user-1", ProviderId::Google, None, None).unwrap();
        let outcome = h
            .service
            .complete_callback(ProviderId::Google, "code", &state_of(&redirect), &redirect.flow_nonce)
            .await
            .unwrap();

        h.service.disconnect(&outcome.credential).await.unwrap();
        assert!(h.store.is_empty());
        assert!(matches!(
            h.service.disconnect(&outcome.credential).await,
            Err(IntegrationError::CredentialNotFound(_))
        ));
    }
}
