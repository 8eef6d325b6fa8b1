//! Credential vault: encryption of stock credentials at rest.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Errors raised by a credential vault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The key material is unusable.
    #[error("Invalid vault key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// The payload was tampered with, truncated, malformed, or sealed with
    /// another key.
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Seals and opens credential payloads.
pub trait CredentialVault: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError>;
}

/// AES-256-GCM vault.
///
/// Each payload is `base64(nonce ‖ ciphertext ‖ tag)` with a fresh random
/// 96-bit nonce.
pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    /// Creates a vault from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != 32 {
            return Err(VaultError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                key.len()
            )));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Creates a vault from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, VaultError> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Self::new(&key)
    }

    /// Creates a vault with a random key. Payloads do not survive a restart.
    pub fn ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }
}

impl std::fmt::Debug for AesGcmVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmVault").finish_non_exhaustive()
    }
}

impl CredentialVault for AesGcmVault {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&sealed);
        Ok(STANDARD.encode(payload))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let payload = STANDARD
            .decode(ciphertext)
            .map_err(|e| VaultError::Decryption(format!("invalid encoding: {e}")))?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Decryption("payload too short".to_string()));
        }

        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let opened = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| VaultError::Decryption("authentication failed".to_string()))?;

        String::from_utf8(opened)
            .map_err(|_| VaultError::Decryption("plaintext is not UTF-8".to_string()))
    }
}
