//! Encrypted, time-boxed OAuth `state` parameter.
//!
//! The flow context travels to the provider and back inside the `state`
//! query parameter. It is serialized, sealed with AES-256-GCM under a
//! dedicated key (version byte authenticated as associated data) and encoded
//! as unpadded base64url, so nothing about the workspace or the PKCE verifier
//! is readable in transit and any modification fails authentication.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::crypto::{self, CryptoKey};
use crate::error::IntegrationError;
use crate::models::credential::SecretString;
use crate::models::provider::ProviderId;

/// States older than this are rejected.
pub const STATE_TTL_MS: i64 = 5 * 60 * 1000;

/// Tolerated clock drift for states that claim to be issued in the future.
const MAX_FUTURE_SKEW_MS: i64 = 60 * 1000;

const STATE_AAD: &[u8] = b"ads-connectors/oauth-state";

/// Upper bound on remembered consumed nonces.
const CONSUMED_NONCE_CAPACITY: usize = 65_536;

/// Millisecond wall clock, injectable for tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Context minted when the user is sent to the provider, consumed once when
/// the provider redirects back.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthFlowContext {
    pub flow_nonce: String,
    pub user_id: String,
    pub provider: ProviderId,
    pub workspace_client_id: Option<String>,
    pub return_path: Option<String>,
    pub pkce_verifier: SecretString,
    pub issued_at_epoch_ms: i64,
}

impl fmt::Debug for OAuthFlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthFlowContext")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("workspace_client_id", &self.workspace_client_id)
            .field("return_path", &self.return_path)
            .field("issued_at_epoch_ms", &self.issued_at_epoch_ms)
            .finish_non_exhaustive()
    }
}

/// Sealed wire shape. Short names keep the state parameter compact.
#[derive(Serialize, Deserialize)]
struct StatePayload {
    n: String,
    u: String,
    p: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    w: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<String>,
    v: String,
    t: i64,
}

/// 32 random bytes, base64url encoded (43 characters).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}

pub struct StateCodec {
    key: CryptoKey,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    /// Nonces already redeemed at a callback, with the instant their state
    /// expires. Entries are dropped once that instant passes.
    consumed: Mutex<LruCache<String, i64>>,
}

impl StateCodec {
    pub fn new(key: CryptoKey) -> Self {
        Self::with_clock(key, Arc::new(SystemClock))
    }

    pub fn with_clock(key: CryptoKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            key,
            clock,
            ttl_ms: STATE_TTL_MS,
            consumed: Mutex::new(LruCache::new(
                NonZeroUsize::new(CONSUMED_NONCE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    pub fn encode(&self, context: &OAuthFlowContext) -> Result<String, IntegrationError> {
        let payload = StatePayload {
            n: context.flow_nonce.clone(),
            u: context.user_id.clone(),
            p: context.provider,
            w: context.workspace_client_id.clone(),
            r: context.return_path.clone(),
            v: context.pkce_verifier.expose().to_string(),
            t: context.issued_at_epoch_ms,
        };
        let plaintext = serde_json::to_vec(&payload).map_err(|_| IntegrationError::InvalidState {
            reason: "context could not be serialized",
        })?;
        let sealed = crypto::encrypt_bytes(&self.key, STATE_AAD, &plaintext)?;
        Ok(base64_url::encode(&sealed))
    }

    /// Open and validate a state string. Fails with `InvalidState` when it is
    /// absent, malformed, tampered with or incomplete, and with
    /// `ExpiredState` once the TTL has elapsed.
    pub fn decode(&self, state: &str) -> Result<OAuthFlowContext, IntegrationError> {
        let state = state.trim();
        if state.is_empty() {
            return Err(IntegrationError::InvalidState { reason: "missing" });
        }

        let sealed = base64_url::decode(state)
            .map_err(|_| IntegrationError::InvalidState { reason: "not base64url" })?;
        // Reject non-canonical encodings so trailing-bit edits cannot alias a valid state.
        if base64_url::encode(&sealed) != state {
            return Err(IntegrationError::InvalidState { reason: "not base64url" });
        }
        let plaintext = crypto::decrypt_bytes(&self.key, STATE_AAD, &sealed).map_err(|_| {
            IntegrationError::InvalidState {
                reason: "failed authentication",
            }
        })?;
        let payload: StatePayload = serde_json::from_slice(&plaintext).map_err(|_| {
            IntegrationError::InvalidState {
                reason: "missing required fields",
            }
        })?;

        if payload.n.is_empty() || payload.u.is_empty() || payload.v.is_empty() {
            return Err(IntegrationError::InvalidState {
                reason: "missing required fields",
            });
        }

        let age_ms = self.clock.now_ms() - payload.t;
        if age_ms > self.ttl_ms {
            return Err(IntegrationError::ExpiredState { age_ms });
        }
        if age_ms < -MAX_FUTURE_SKEW_MS {
            return Err(IntegrationError::InvalidState {
                reason: "issued in the future",
            });
        }

        Ok(OAuthFlowContext {
            flow_nonce: payload.n,
            user_id: payload.u,
            provider: payload.p,
            workspace_client_id: payload.w,
            return_path: payload.r,
            pkce_verifier: SecretString::new(payload.v),
            issued_at_epoch_ms: payload.t,
        })
    }

    /// Decode and bind the state to the callback it arrived at: the nonce must
    /// equal the one the client most recently issued and the provider must
    /// match the callback route. A state is redeemable once; later callbacks
    /// carrying it fail with `InvalidState`.
    pub fn decode_for_callback(
        &self,
        state: &str,
        expected_nonce: &str,
        provider: ProviderId,
    ) -> Result<OAuthFlowContext, IntegrationError> {
        let context = self.decode(state)?;
        if !nonce_matches(&context.flow_nonce, expected_nonce) {
            return Err(IntegrationError::InvalidState {
                reason: "nonce mismatch",
            });
        }
        if context.provider != provider {
            return Err(IntegrationError::InvalidState {
                reason: "issued for another provider",
            });
        }
        self.consume(&context)?;
        Ok(context)
    }

    fn consume(&self, context: &OAuthFlowContext) -> Result<(), IntegrationError> {
        let now = self.clock.now_ms();
        let mut consumed = self.consumed.lock().unwrap_or_else(|p| p.into_inner());
        while let Some((_, expires_at)) = consumed.peek_lru() {
            if *expires_at >= now {
                break;
            }
            consumed.pop_lru();
        }
        if consumed.contains(&context.flow_nonce) {
            return Err(IntegrationError::InvalidState {
                reason: "already used",
            });
        }
        consumed.put(
            context.flow_nonce.clone(),
            context.issued_at_epoch_ms.saturating_add(self.ttl_ms),
        );
        Ok(())
    }
}

/// Constant-time nonce comparison.
pub fn nonce_matches(actual: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(actual.as_bytes().ct_eq(expected.as_bytes()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Manually advanced clock.
    #[derive(Debug, Default)]
    pub struct FixedClock(pub AtomicI64);

    impl FixedClock {
        pub fn at(ms: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(ms)))
        }

        pub fn advance(&self, ms: i64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    const T0: i64 = 1_700_000_000_000;

    fn codec(clock: Arc<FixedClock>) -> StateCodec {
        StateCodec::with_clock(CryptoKey::new(vec![9u8; 32]).unwrap(), clock)
    }

    fn context() -> OAuthFlowContext {
        OAuthFlowContext {
            flow_nonce: "nonce-abc".into(),
            user_id: "user-7".into(),
            provider: ProviderId::Google,
            workspace_client_id: Some("client-acme".into()),
            return_path: Some("/integrations".into()),
            pkce_verifier: SecretString::from("verifier-secret-value"),
            issued_at_epoch_ms: T0,
        }
    }

    #[test]
    fn roundtrip_preserves_context() {
        let codec = codec(FixedClock::at(T0));
        let state = codec.encode(&context()).unwrap();
        assert_eq!(codec.decode(&state).unwrap(), context());
    }

    #[test]
    fn state_is_url_safe_and_opaque() {
        let codec = codec(FixedClock::at(T0));
        let state = codec.encode(&context()).unwrap();
        assert!(state
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(!state.contains("client-acme"));
        assert!(!state.contains("verifier"));
    }

    #[test]
    fn accepted_at_four_fifty_nine() {
        let clock = FixedClock::at(T0);
        let codec = codec(clock.clone());
        let state = codec.encode(&context()).unwrap();
        clock.advance(4 * 60 * 1000 + 59 * 1000);
        assert!(codec.decode(&state).is_ok());
    }

    #[test]
    fn accepted_at_exactly_five_minutes() {
        let clock = FixedClock::at(T0);
        let codec = codec(clock.clone());
        let state = codec.encode(&context()).unwrap();
        clock.advance(STATE_TTL_MS);
        assert!(codec.decode(&state).is_ok());
    }

    #[test]
    fn expired_at_five_oh_one() {
        let clock = FixedClock::at(T0);
        let codec = codec(clock.clone());
        let state = codec.encode(&context()).unwrap();
        clock.advance(5 * 60 * 1000 + 1000);
        assert!(matches!(
            codec.decode(&state),
            Err(IntegrationError::ExpiredState { age_ms: 301_000 })
        ));
    }

    #[test]
    fn tampering_any_single_character_is_rejected() {
        let codec = codec(FixedClock::at(T0));
        let state = codec.encode(&context()).unwrap();
        for index in 0..state.len() {
            let mut chars: Vec<char> = state.chars().collect();
            chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
            let tampered: String = chars.into_iter().collect();
            if tampered == state {
                continue;
            }
            let result = codec.decode(&tampered);
            assert!(
                matches!(result, Err(IntegrationError::InvalidState { .. })),
                "tampering index {index} gave {result:?}"
            );
        }
    }

    #[test]
    fn absent_and_garbage_states_are_invalid() {
        let codec = codec(FixedClock::at(T0));
        for state in ["", "   ", "not*base64", "AAAA"] {
            assert!(matches!(
                codec.decode(state),
                Err(IntegrationError::InvalidState { .. })
            ));
        }
    }

    #[test]
    fn other_key_cannot_open_state() {
        let state = codec(FixedClock::at(T0)).encode(&context()).unwrap();
        let other = StateCodec::with_clock(CryptoKey::new(vec![1u8; 32]).unwrap(), FixedClock::at(T0));
        assert!(matches!(
            other.decode(&state),
            Err(IntegrationError::InvalidState { reason: "failed authentication" })
        ));
    }

    #[test]
    fn callback_binding_checks_nonce_and_provider() {
        let codec = codec(FixedClock::at(T0));
        let state = codec.encode(&context()).unwrap();

        assert!(codec
            .decode_for_callback(&state, "nonce-abc", ProviderId::Google)
            .is_ok());
        assert!(matches!(
            codec.decode_for_callback(&state, "nonce-xyz", ProviderId::Google),
            Err(IntegrationError::InvalidState { reason: "nonce mismatch" })
        ));
        assert!(matches!(
            codec.decode_for_callback(&state, "", ProviderId::Google),
            Err(IntegrationError::InvalidState { reason: "nonce mismatch" })
        ));
        assert!(matches!(
            codec.decode_for_callback(&state, "nonce-abc", ProviderId::Meta),
            Err(IntegrationError::InvalidState { .. })
        ));
    }

    #[test]
    fn state_is_redeemable_once() {
        let clock = FixedClock::at(T0);
        let codec = codec(clock.clone());
        let state = codec.encode(&context()).unwrap();

        assert!(codec
            .decode_for_callback(&state, "nonce-abc", ProviderId::Google)
            .is_ok());
        clock.advance(1_000);
        assert!(matches!(
            codec.decode_for_callback(&state, "nonce-abc", ProviderId::Google),
            Err(IntegrationError::InvalidState { reason: "already used" })
        ));

        // A fresh flow is unaffected.
        let other = OAuthFlowContext {
            flow_nonce: "nonce-def".into(),
            issued_at_epoch_ms: T0 + 1_000,
            ..context()
        };
        let other_state = codec.encode(&other).unwrap();
        assert!(codec
            .decode_for_callback(&other_state, "nonce-def", ProviderId::Google)
            .is_ok());
    }

    #[test]
    fn consumed_nonces_are_forgotten_after_expiry() {
        let clock = FixedClock::at(T0);
        let codec = codec(clock.clone());
        let state = codec.encode(&context()).unwrap();
        codec
            .decode_for_callback(&state, "nonce-abc", ProviderId::Google)
            .unwrap();

        clock.advance(STATE_TTL_MS + 1);
        let later = OAuthFlowContext {
            flow_nonce: "nonce-later".into(),
            issued_at_epoch_ms: T0 + STATE_TTL_MS + 1,
            ..context()
        };
        let later_state = codec.encode(&later).unwrap();
        codec
            .decode_for_callback(&later_state, "nonce-later", ProviderId::Google)
            .unwrap();
        assert!(!codec.consumed.lock().unwrap().contains(&"nonce-abc".to_string()));
        // The expired state itself still fails on age.
        assert!(matches!(
            codec.decode_for_callback(&state, "nonce-abc", ProviderId::Google),
            Err(IntegrationError::ExpiredState { .. })
        ));
    }

    #[test]
    fn future_dated_state_is_rejected() {
        let codec = codec(FixedClock::at(T0));
        let future = OAuthFlowContext {
            issued_at_epoch_ms: T0 + 10 * 60 * 1000,
            ..context()
        };
        let state = codec.encode(&future).unwrap();
        assert!(matches!(
            codec.decode(&state),
            Err(IntegrationError::InvalidState { .. })
        ));
    }

    #[test]
    fn nonces_are_random_and_url_safe() {
        let a = generate_nonce();
        assert_ne!(a, generate_nonce());
        assert_eq!(a.len(), 43);
    }
}
