//! Credential sealing for data-source connection configurations
//!
//! Configurations are sealed with AES-256-GCM before they reach storage. The
//! key is derived from the process passphrase with SHA-256. A sealed payload
//! is `base64(nonce || ciphertext)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use compass_core::{CompassError, Result};
use sha2::{Digest, Sha256};
use std::fmt;

const NONCE_LEN: usize = 12;

/// Seals and opens connection configurations
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build a cipher from the process-wide passphrase
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(CompassError::Credential(
                "encryption passphrase is empty".to_string(),
            ));
        }

        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CompassError::Credential("invalid key length".to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt a connection configuration for storage
    pub fn seal(&self, config: &serde_json::Value) -> Result<String> {
        let plaintext = serde_json::to_vec(config)?;
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|_| CompassError::Credential("failed to seal configuration".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(payload))
    }

    /// Decrypt a sealed configuration
    pub fn open(&self, sealed: &str) -> Result<serde_json::Value> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(sealed)
            .map_err(|_| CompassError::Credential("sealed configuration is not base64".to_string()))?;

        if payload.len() <= NONCE_LEN {
            return Err(CompassError::Credential(
                "sealed configuration is truncated".to_string(),
            ));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CompassError::Credential("failed to open configuration".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}
