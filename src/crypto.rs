//! AES-256-GCM sealing for OAuth state and stored provider tokens.
//!
//! Every payload is laid out as `version (1) | nonce (12) | ciphertext + tag (16)`.
//! The version byte is prepended to the caller's associated data before
//! sealing, so flipping it fails authentication instead of silently selecting
//! another format.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::credential::{CredentialKey, SecretString};

pub const VERSION_V1: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("unsupported payload version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl std::fmt::Debug for ZeroizingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey(****)")
    }
}

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Decode a standard base64 key as found in `ADS_CRYPTO_KEY`.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not valid base64: {e}")))?;
        Self::new(bytes)
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn versioned_aad(version: u8, aad: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(aad.len() + 1);
    full.push(version);
    full.extend_from_slice(aad);
    full
}

/// Seal `plaintext` under `key`, binding it to `aad`.
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let aad = versioned_aad(VERSION_V1, aad);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_V1);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Open a payload produced by [`encrypt_bytes`].
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let Some(&version) = ciphertext.first() else {
        return Err(CryptoError::EmptyCiphertext);
    };
    if version != VERSION_V1 {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];
    let aad = versioned_aad(version, aad);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a stored token, bound to the credential it belongs to.
pub fn seal_secret(
    key: &CryptoKey,
    owner: &CredentialKey,
    secret: &SecretString,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, owner.aad().as_bytes(), secret.expose().as_bytes())
}

/// Decrypt a stored token. Fails when the row was moved to another key.
pub fn open_secret(
    key: &CryptoKey,
    owner: &CredentialKey,
    ciphertext: &[u8],
) -> Result<SecretString, CryptoError> {
    let mut bytes = decrypt_bytes(key, owner.aad().as_bytes(), ciphertext)?;
    let result = std::str::from_utf8(&bytes)
        .map(SecretString::from)
        .map_err(|_| CryptoError::InvalidFormat);
    bytes.zeroize();
    result
}
