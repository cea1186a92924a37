//! Hub certificate authority: a self-signed root plus short-lived agent
//! client certificates issued at enrollment time (spec.md §4.B, §4.H).

use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, KeyPair};
use sonde_core::HubError;
use time::{Duration, OffsetDateTime};

const DEFAULT_CA_VALIDITY_DAYS: i64 = 3650;

/// The hub's root of trust: a self-signed CA certificate plus its keypair.
/// The keypair signs every agent certificate issued through enrollment.
pub struct CaKeypair {
    ca_cert: Certificate,
    ca_key: KeyPair,
}

/// A freshly minted agent certificate, PEM-encoded, ready to hand back to
/// an enrolling agent alongside its private key.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub serial: String,
}

impl CaKeypair {
    /// Generates a fresh self-signed CA, valid for ten years from issuance.
    pub fn generate(common_name: &str) -> Result<Self, HubError> {
        let ca_key = KeyPair::generate()
            .map_err(|e| HubError::Internal(format!("CA keypair generation failed: {e}")))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| HubError::Internal(format!("invalid CA params: {e}")))?;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = OffsetDateTime::now_utc() + Duration::days(DEFAULT_CA_VALIDITY_DAYS);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;

        let ca_cert = params
            .self_signed(&ca_key)
            .map_err(|e| HubError::Internal(format!("CA self-signing failed: {e}")))?;

        Ok(Self { ca_cert, ca_key })
    }

    /// Re-hydrates a CA from a previously generated and persisted PEM pair.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, HubError> {
        let ca_key = KeyPair::from_pem(key_pem)
            .map_err(|e| HubError::Internal(format!("invalid CA key PEM: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| HubError::Internal(format!("invalid CA cert PEM: {e}")))?;
        let ca_cert = params
            .self_signed(&ca_key)
            .map_err(|e| HubError::Internal(format!("CA re-signing failed: {e}")))?;
        Ok(Self { ca_cert, ca_key })
    }

    pub fn cert_pem(&self) -> String {
        self.ca_cert.pem()
    }

    pub fn key_pem(&self) -> String {
        self.ca_key.serialize_pem()
    }

    /// Issues a client certificate for an agent, CN set to the agent's
    /// enrolled name, valid for `validity_days` from now (spec.md §4.H:
    /// short-lived, re-issued on re-enrollment rather than renewed).
    pub fn issue_agent_certificate(
        &self,
        agent_name: &str,
        validity_days: i64,
    ) -> Result<IssuedCertificate, HubError> {
        let agent_key = KeyPair::generate()
            .map_err(|e| HubError::Internal(format!("agent keypair generation failed: {e}")))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| HubError::Internal(format!("invalid agent cert params: {e}")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, agent_name);
        params.distinguished_name = dn;
        params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = OffsetDateTime::now_utc() + Duration::days(validity_days);
        let serial = rcgen::SerialNumber::from(rand::random::<u64>().to_be_bytes().to_vec());
        params.serial_number = Some(serial.clone());

        let agent_cert = params
            .signed_by(&agent_key, &self.ca_cert, &self.ca_key)
            .map_err(|e| HubError::Internal(format!("agent certificate signing failed: {e}")))?;

        Ok(IssuedCertificate {
            cert_pem: agent_cert.pem(),
            key_pem: agent_key.serialize_pem(),
            serial: hex::encode(serial.as_ref()),
        })
    }
}
