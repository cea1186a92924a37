//! Message signing for dispatcher frames (spec.md §4.D).
//!
//! The CA keypair authenticates X.509 certificates, not arbitrary byte
//! strings, so every hub instance also carries a dedicated Ed25519 signing
//! key for the `{id, kind, body, sig}` frame envelope. The canonical
//! signature input is `utf8(<kind>|<id>|<canonical-json(body)>)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sonde_core::HubError;

/// Builds the canonical byte string signed over a dispatcher frame.
pub fn signing_input(kind: &str, id: &str, canonical_body: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(kind.len() + id.len() + canonical_body.len() + 2);
    input.extend_from_slice(kind.as_bytes());
    input.push(b'|');
    input.extend_from_slice(id.as_bytes());
    input.push(b'|');
    input.extend_from_slice(canonical_body);
    input
}

/// The hub's Ed25519 message-signing keypair, distinct from the CA's
/// certificate-signing key.
pub struct MessageSigner {
    signing_key: SigningKey,
}

impl MessageSigner {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restores a signer from a 32-byte seed, as persisted alongside the CA.
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn verifying_key(&self) -> MessageVerifyingKey {
        MessageVerifyingKey {
            key: self.signing_key.verifying_key(),
        }
    }

    /// Signs `kind`/`id`/canonical body, returning a base64-encoded signature.
    pub fn sign_message(&self, kind: &str, id: &str, canonical_body: &[u8]) -> String {
        let input = signing_input(kind, id, canonical_body);
        let signature: Signature = self.signing_key.sign(&input);
        BASE64.encode(signature.to_bytes())
    }
}

/// The public half of a [`MessageSigner`], distributed to agents so they can
/// verify hub-originated frames (and, reciprocally, signs the counterpart
/// agent traffic verified by the hub).
#[derive(Clone)]
pub struct MessageVerifyingKey {
    key: VerifyingKey,
}

impl MessageVerifyingKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, HubError> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| HubError::Validation(format!("invalid verifying key: {e}")))?;
        Ok(Self { key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    /// Verifies a base64-encoded signature over `kind`/`id`/canonical body.
    /// Returns `false` rather than an error on any malformed input, since a
    /// forged or corrupted signature is an expected adversarial case, not a
    /// bug.
    pub fn verify_message(&self, kind: &str, id: &str, canonical_body: &[u8], sig: &str) -> bool {
        let Ok(sig_bytes) = BASE64.decode(sig) else {
            return false;
        };
        let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        let input = signing_input(kind, id, canonical_body);
        self.key.verify(&input, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_its_own_signature() {
        let signer = MessageSigner::generate();
        let sig = signer.sign_message("request", "req-1", b"{\"probe\":\"ping\"}");
        assert!(signer
            .verifying_key()
            .verify_message("request", "req-1", b"{\"probe\":\"ping\"}", &sig));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let signer = MessageSigner::generate();
        let sig = signer.sign_message("request", "req-1", b"{\"probe\":\"ping\"}");
        assert!(!signer
            .verifying_key()
            .verify_message("request", "req-1", b"{\"probe\":\"pong\"}", &sig));
    }

    #[test]
    fn rejects_a_signature_from_a_different_key() {
        let signer = MessageSigner::generate();
        let other = MessageSigner::generate();
        let sig = signer.sign_message("event", "evt-1", b"{}");
        assert!(!other
            .verifying_key()
            .verify_message("event", "evt-1", b"{}", &sig));
    }

    #[test]
    fn round_trips_through_raw_bytes() {
        let signer = MessageSigner::generate();
        let seed = signer.to_bytes();
        let restored = MessageSigner::from_bytes(&seed);
        assert_eq!(signer.verifying_key().to_bytes(), restored.verifying_key().to_bytes());
    }

    #[test]
    fn malformed_signature_does_not_verify() {
        let signer = MessageSigner::generate();
        assert!(!signer
            .verifying_key()
            .verify_message("request", "req-1", b"{}", "not-base64!!"));
    }
}
