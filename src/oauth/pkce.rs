//! PKCE (RFC 7636) verifier and S256 challenge.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::models::credential::SecretString;

pub const CHALLENGE_METHOD: &str = "S256";

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: SecretString,
    pub challenge: String,
}

impl PkcePair {
    /// 32 random bytes give a 43 character verifier, the RFC minimum.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        let verifier = SecretString::new(base64_url::encode(&bytes));
        let challenge = challenge_for(verifier.expose());
        Self {
            verifier,
            challenge,
        }
    }
}

pub fn challenge_for(verifier: &str) -> String {
    base64_url::encode(&Sha256::digest(verifier.as_bytes()))
}
