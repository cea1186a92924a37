//! Integration pack contract (spec.md §4.E, §9 "Callback-style integration
//! packs").

use std::collections::HashMap;

use serde_json::Value;

use crate::http::HttpFetch;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("probe '{0}' is not handled by this pack")]
    UnknownProbe(String),
    #[error("invalid integration config: {0}")]
    InvalidConfig(String),
    #[error("missing credential '{0}'")]
    MissingCredential(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("handler panicked")]
    Panicked,
}

impl From<PackError> for sonde_core::HubError {
    fn from(err: PackError) -> Self {
        match err {
            PackError::UnknownProbe(p) => sonde_core::HubError::NotFound(format!("probe '{p}'")),
            PackError::InvalidConfig(m) | PackError::MissingCredential(m) => sonde_core::HubError::Validation(m),
            PackError::Upstream(m) => sonde_core::HubError::Unreachable(m),
            PackError::Panicked => sonde_core::HubError::Internal("integration handler panicked".into()),
        }
    }
}

/// Describes one configured instance's public config and its type's
/// identity. Secrets never appear here; they travel separately as
/// [`DecryptedCredentials`].
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    pub integration_id: String,
    pub integration_type: String,
    pub config: Value,
}

impl IntegrationConfig {
    pub fn field_str(&self, key: &str) -> Result<&str, PackError> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| PackError::InvalidConfig(format!("missing string field '{key}'")))
    }
}

/// Secret material decrypted from the integration's sealed config, keyed by
/// field name (e.g. `api_key`, `oauth_token`).
#[derive(Debug, Clone, Default)]
pub struct DecryptedCredentials {
    fields: HashMap<String, String>,
}

impl DecryptedCredentials {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Result<&str, PackError> {
        self.fields
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| PackError::MissingCredential(key.to_string()))
    }
}

/// Describes what probes a pack type exposes, for discovery surfaces
/// (`sonde.list_integrations`, the MCP tool schema).
#[derive(Debug, Clone)]
pub struct PackManifest {
    pub type_: String,
    pub display_name: String,
    pub probes: Vec<String>,
}

/// One callback handling a single probe name within a pack.
pub trait ProbeHandler: Send + Sync {
    fn call(
        &self,
        params: Value,
        config: &IntegrationConfig,
        credentials: &DecryptedCredentials,
        fetch: &dyn HttpFetch,
    ) -> Result<Value, PackError>;
}

/// A registered integration type: Graph, Datadog, Proxmox, ServiceNow, or
/// (the one shipped here) a generic HTTP probe. Real third-party packs are
/// out of scope; this trait is the seam they would plug into.
pub trait IntegrationPack: Send + Sync {
    fn manifest(&self) -> &PackManifest;
    fn handlers(&self) -> &HashMap<String, Box<dyn ProbeHandler>>;
    fn test_connection(&self, config: &IntegrationConfig, fetch: &dyn HttpFetch) -> Result<bool, PackError>;
}
