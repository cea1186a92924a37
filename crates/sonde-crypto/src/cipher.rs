//! AES-256-GCM secret encryption with HKDF-SHA256 key derivation.
//!
//! Ciphertext is self-describing: `nonce(12) || ciphertext || tag`, base64
//! encoded. The master key never touches disk directly, only the derived
//! per-purpose key does the sealing.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use sonde_core::HubError;

const NONCE_LEN: usize = 12;

/// Derives a 256-bit AES key from a master secret and a purpose-specific
/// info string, and seals/opens secrets with it.
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    /// Derives the cipher's key via `HKDF-SHA256(master_secret, salt=info)`.
    /// `info` scopes the derived key to one purpose (e.g. `"integration-secret"`)
    /// so the same master secret can back multiple independent ciphers.
    pub fn derive(master_secret: &[u8], info: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, master_secret);
        let mut key = [0u8; 32];
        hk.expand(info, &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self { key }
    }

    /// Encrypts `plaintext`, returning a base64 string of `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, HubError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| HubError::Internal(format!("invalid AES key: {e}")))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| HubError::Internal(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypts a value produced by [`SecretCipher::seal`]. Any tampering or
    /// key mismatch surfaces as `HubError::Decrypt`, never a panic.
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, HubError> {
        let raw = BASE64
            .decode(sealed)
            .map_err(|e| HubError::Decrypt(format!("invalid base64: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(HubError::Decrypt("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| HubError::Internal(format!("invalid AES key: {e}")))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| HubError::Decrypt("authentication failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_secret() {
        let cipher = SecretCipher::derive(b"master-secret-material", b"integration-secret");
        let sealed = cipher.seal(b"super-secret-api-key").unwrap();
        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened, b"super-secret-api-key");
    }

    #[test]
    fn distinct_seals_of_the_same_plaintext_differ() {
        let cipher = SecretCipher::derive(b"master-secret-material", b"integration-secret");
        let a = cipher.seal(b"same plaintext").unwrap();
        let b = cipher.seal(b"same plaintext").unwrap();
        assert_ne!(a, b, "nonce must be re-rolled on every seal");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let cipher = SecretCipher::derive(b"master-secret-material", b"integration-secret");
        let mut sealed = cipher.seal(b"secret").unwrap();
        sealed.push('A');
        assert!(matches!(cipher.open(&sealed), Err(HubError::Decrypt(_))));
    }

    #[test]
    fn wrong_info_scope_cannot_open_another_purpose() {
        let a = SecretCipher::derive(b"master-secret-material", b"integration-secret");
        let b = SecretCipher::derive(b"master-secret-material", b"enrollment-secret");
        let sealed = a.seal(b"secret").unwrap();
        assert!(matches!(b.open(&sealed), Err(HubError::Decrypt(_))));
    }
}
