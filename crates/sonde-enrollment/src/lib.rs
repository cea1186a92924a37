//! One-shot enrollment tokens and the agent-certificate issuance that
//! follows a successful consume (spec.md §4.H).

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine;
use rand::RngCore;
use sonde_core::HubError;
use sonde_crypto::CaKeypair;
use sonde_store::agent::NewAgent;
use sonde_store::enrollment::{ConsumeOutcome, EnrollmentToken};
use sonde_store::{Store, StoreError};

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_AGENT_CERT_VALIDITY_DAYS: i64 = 30;
const TOKEN_ENTROPY_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("token already used")]
    AlreadyUsed,
    #[error("token expired")]
    Expired,
    #[error("unknown enrollment token")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crypto(#[from] HubError),
}

impl From<EnrollmentError> for HubError {
    fn from(err: EnrollmentError) -> Self {
        match err {
            EnrollmentError::AlreadyUsed => HubError::Conflict("token already used".into()),
            EnrollmentError::Expired => HubError::Conflict("token expired".into()),
            EnrollmentError::NotFound => HubError::NotFound("unknown enrollment token".into()),
            EnrollmentError::Store(err) => err.into(),
            EnrollmentError::Crypto(err) => err,
        }
    }
}

/// What an agent receives after a successful `consume` (spec.md §4.H):
/// its signed client certificate, the CA's own certificate so it can
/// verify the hub's server cert, and the URL to dial over WebSocket.
#[derive(Debug, Clone)]
pub struct EnrollmentBundle {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_cert_pem: String,
    pub hub_url: String,
}

/// Issues and consumes enrollment tokens, minting agent certificates on
/// success (spec.md §4.H). Holds the hub's CA in memory; the private key
/// is decrypted once at construction and never touches disk again.
pub struct EnrollmentService {
    store: Store,
    ca: CaKeypair,
    hub_url: String,
    agent_cert_validity_days: i64,
}

impl EnrollmentService {
    pub fn new(store: Store, ca: CaKeypair, hub_url: impl Into<String>) -> Self {
        Self { store, ca, hub_url: hub_url.into(), agent_cert_validity_days: DEFAULT_AGENT_CERT_VALIDITY_DAYS }
    }

    pub fn with_agent_cert_validity_days(mut self, days: i64) -> Self {
        self.agent_cert_validity_days = days;
        self
    }

    /// Mints a fresh opaque bearer token (256 bits of entropy, comfortably
    /// above the spec's 128-bit floor) with the given TTL.
    pub fn create_token(&self, ttl_seconds: i64) -> Result<EnrollmentToken, EnrollmentError> {
        let mut raw = [0u8; TOKEN_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = BASE64.encode(raw);
        Ok(self.store.create_enrollment_token(&token, ttl_seconds)?)
    }

    pub fn create_default_token(&self) -> Result<EnrollmentToken, EnrollmentError> {
        self.create_token(DEFAULT_TOKEN_TTL_SECONDS)
    }

    pub fn is_valid(&self, token: &str) -> Result<bool, EnrollmentError> {
        Ok(self.store.is_enrollment_token_valid(token)?)
    }

    /// Atomically consumes `token` for `agent_name`. On success, upserts
    /// the agent row (re-enrollment replaces identity, spec.md §9 open
    /// question) and issues a fresh client certificate.
    pub fn consume(&self, token: &str, agent_name: &str) -> Result<EnrollmentBundle, EnrollmentError> {
        match self.store.consume_enrollment_token(token, agent_name)? {
            ConsumeOutcome::Consumed => {}
            ConsumeOutcome::AlreadyUsed => return Err(EnrollmentError::AlreadyUsed),
            ConsumeOutcome::Expired => return Err(EnrollmentError::Expired),
            ConsumeOutcome::NotFound => return Err(EnrollmentError::NotFound),
        }

        let agent = self.store.upsert_agent_by_name(NewAgent { name: agent_name.to_string(), os: None, agent_version: None })?;
        let issued = self.ca.issue_agent_certificate(agent_name, self.agent_cert_validity_days)?;
        self.store.set_agent_certificate(&agent.id, &issued.cert_pem, &issued.serial)?;

        Ok(EnrollmentBundle {
            cert_pem: issued.cert_pem,
            key_pem: issued.key_pem,
            ca_cert_pem: self.ca.cert_pem(),
            hub_url: self.hub_url.clone(),
        })
    }
}

/// Loads the hub's CA from the store, generating and persisting a fresh
/// one on first boot. The CA private key is sealed at rest with
/// `sonde_crypto::SecretCipher` and decrypted once here.
pub fn bootstrap_ca(store: &Store, cipher: &sonde_crypto::SecretCipher, common_name: &str) -> Result<CaKeypair, HubError> {
    if let Some(existing) = store.get_hub_ca().map_err(HubError::from)? {
        let key_pem_enc = existing
            .key_pem_enc
            .ok_or_else(|| HubError::Internal("hub_ca row missing encrypted key".to_string()))?;
        let key_pem = cipher.open(&key_pem_enc)?;
        let key_pem = String::from_utf8(key_pem).map_err(|e| HubError::Internal(format!("CA key PEM is not UTF-8: {e}")))?;
        return CaKeypair::from_pem(&existing.cert_pem, &key_pem);
    }

    let ca = CaKeypair::generate(common_name)?;
    let key_pem_enc = cipher.seal(ca.key_pem().as_bytes())?;
    store.save_hub_ca(&ca.cert_pem(), &key_pem_enc).map_err(HubError::from)?;
    Ok(ca)
}
