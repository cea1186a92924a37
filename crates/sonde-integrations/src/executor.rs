//! Integration pack registry and the five-step probe execution algorithm
//! (spec.md §4.E).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex};
use serde_json::Value;
use sonde_core::ProbeStatus;
use sonde_crypto::SecretCipher;
use sonde_store::Store;

use crate::http::HttpFetch;
use crate::pack::{DecryptedCredentials, IntegrationConfig, IntegrationPack, PackError};

/// Pack types keyed by `type` (spec.md §9). Built once at startup.
#[derive(Default)]
pub struct PackRegistry {
    packs: HashMap<String, Box<dyn IntegrationPack>>,
}

impl PackRegistry {
    pub fn new() -> Self {
        Self { packs: HashMap::new() }
    }

    pub fn register(&mut self, pack: Box<dyn IntegrationPack>) {
        self.packs.insert(pack.manifest().type_.clone(), pack);
    }

    pub fn get(&self, type_: &str) -> Option<&dyn IntegrationPack> {
        self.packs.get(type_).map(|b| b.as_ref())
    }

    pub fn types(&self) -> Vec<String> {
        self.packs.keys().cloned().collect()
    }
}

/// The outcome of one `IntegrationExecutor::run` call, shaped to become a
/// `ProbeResult` row regardless of success or failure.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

#[derive(serde::Deserialize)]
struct SealedConfig {
    #[serde(default)]
    config: Value,
    #[serde(default)]
    credentials: HashMap<String, String>,
}

/// Executes probes against configured integration instances. Holds the
/// pack registry, the store (to resolve an integration by id/name and
/// record its config), the secret cipher (to open a sealed config), the
/// HTTP transport, and the per-instance OAuth cache and call-serialisation
/// locks.
pub struct IntegrationExecutor {
    registry: Arc<PackRegistry>,
    store: Store,
    cipher: Arc<SecretCipher>,
    fetch: Arc<dyn HttpFetch>,
    oauth: crate::oauth::OAuthTokenCache,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IntegrationExecutor {
    pub fn new(registry: PackRegistry, store: Store, cipher: SecretCipher, fetch: Arc<dyn HttpFetch>) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            cipher: Arc::new(cipher),
            fetch,
            oauth: crate::oauth::OAuthTokenCache::new(),
            locks: DashMap::new(),
        }
    }

    pub fn oauth_cache(&self) -> &crate::oauth::OAuthTokenCache {
        &self.oauth
    }

    /// The set of pack types registered with this executor.
    pub fn registered_types(&self) -> Vec<String> {
        self.registry.types()
    }

    /// True if `selector` names a configured integration instance, by
    /// `id` or by its unique `name`. Used by `sonde-router` to recognise
    /// an integration-pack probe's instance prefix before delegating
    /// (spec.md §4.F step 1) without duplicating the store's own
    /// id-or-name resolution.
    pub fn instance_exists(&self, selector: &str) -> bool {
        self.store.get_integration_by_id(selector).ok().flatten().is_some()
            || self.store.get_integration_by_name(selector).ok().flatten().is_some()
    }

    /// Acquires the per-integration-instance mutex a handler can use to
    /// serialise access to a rate-limited upstream (spec.md §4.E
    /// concurrency note).
    pub fn lock_for(&self, integration_id: &str) -> ArcMutexGuard<()> {
        let mutex = self
            .locks
            .entry(integration_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Mutex::lock_arc(&mutex)
    }

    fn resolve(&self, integration_id_or_name: &str) -> Result<(IntegrationConfig, DecryptedCredentials), PackError> {
        let integration = self
            .store
            .get_integration_by_id(integration_id_or_name)
            .ok()
            .flatten()
            .or_else(|| self.store.get_integration_by_name(integration_id_or_name).ok().flatten())
            .ok_or_else(|| PackError::InvalidConfig(format!("unknown integration '{integration_id_or_name}'")))?;

        let opened = self
            .cipher
            .open(&integration.config_encrypted)
            .map_err(|e| PackError::InvalidConfig(format!("failed to decrypt integration config: {e}")))?;
        let sealed: SealedConfig = serde_json::from_slice(&opened)
            .map_err(|e| PackError::InvalidConfig(format!("malformed sealed config: {e}")))?;

        Ok((
            IntegrationConfig {
                integration_id: integration.id,
                integration_type: integration.type_,
                config: sealed.config,
            },
            DecryptedCredentials::new(sealed.credentials),
        ))
    }

    /// The five-step algorithm: resolve the integration and its pack, open
    /// its sealed config, find the probe's handler, and run it, turning
    /// any error (including a caught panic at the pack-call boundary) into
    /// a `ProbeOutcome` rather than letting it escape.
    pub fn run(&self, integration_id_or_name: &str, probe: &str, params: Value) -> ProbeOutcome {
        let started = Instant::now();
        let outcome = self.run_inner(integration_id_or_name, probe, params);
        let duration_ms = started.elapsed().as_millis() as i64;
        match outcome {
            Ok(data) => ProbeOutcome { status: ProbeStatus::Success, data: Some(data), error: None, duration_ms },
            Err(err) => ProbeOutcome { status: ProbeStatus::Error, data: None, error: Some(err.to_string()), duration_ms },
        }
    }

    fn run_inner(&self, integration_id_or_name: &str, probe: &str, params: Value) -> Result<Value, PackError> {
        let (config, credentials) = self.resolve(integration_id_or_name)?;
        let pack = self
            .registry
            .get(&config.integration_type)
            .ok_or_else(|| PackError::InvalidConfig(format!("no pack registered for type '{}'", config.integration_type)))?;
        let handler = pack
            .handlers()
            .get(probe)
            .ok_or_else(|| PackError::UnknownProbe(probe.to_string()))?;

        let fetch = self.fetch.as_ref();
        catch_unwind(AssertUnwindSafe(|| handler.call(params, &config, &credentials, fetch)))
            .unwrap_or(Err(PackError::Panicked))
    }

    pub fn test_connection(&self, integration_id_or_name: &str) -> Result<bool, PackError> {
        let (config, _) = self.resolve(integration_id_or_name)?;
        let pack = self
            .registry
            .get(&config.integration_type)
            .ok_or_else(|| PackError::InvalidConfig(format!("no pack registered for type '{}'", config.integration_type)))?;
        pack.test_connection(&config, self.fetch.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::HttpProbePack;
    use crate::http::fake::FakeFetch;
    use crate::http::HttpResponse;
    use serde_json::json;
    use sonde_store::integration::NewIntegration;

    fn seal(cipher: &SecretCipher, config: Value, credentials: HashMap<String, String>) -> String {
        let payload = serde_json::to_vec(&json!({"config": config, "credentials": credentials})).unwrap();
        cipher.seal(&payload).unwrap()
    }

    fn executor_with_instance(fetch_responses: Vec<Result<HttpResponse, String>>) -> (IntegrationExecutor, String) {
        let store = Store::open_in_memory().unwrap();
        let cipher = SecretCipher::derive(b"test-master-secret", b"integration-secret");
        let sealed = seal(&cipher, json!({"base_url": "https://svc.example"}), HashMap::new());
        let integration = store
            .create_integration(NewIntegration { type_: "http-probe".into(), name: "svc".into(), config_encrypted: sealed })
            .unwrap();

        let mut registry = PackRegistry::new();
        registry.register(Box::new(HttpProbePack::new()));
        let fetch: Arc<dyn HttpFetch> = Arc::new(FakeFetch::new(fetch_responses));
        let cipher = SecretCipher::derive(b"test-master-secret", b"integration-secret");
        (IntegrationExecutor::new(registry, store, cipher, fetch), integration.id)
    }

    #[test]
    fn runs_a_probe_end_to_end_through_the_registered_pack() {
        let (executor, id) = executor_with_instance(vec![Ok(HttpResponse { status: 200, body: b"ok".to_vec() })]);
        let outcome = executor.run(&id, "check", json!({"path": "/"}));
        assert_eq!(outcome.status, ProbeStatus::Success);
        assert!(outcome.data.unwrap()["ok"].as_bool().unwrap());
    }

    #[test]
    fn unknown_probe_name_is_an_error_outcome() {
        let (executor, id) = executor_with_instance(vec![]);
        let outcome = executor.run(&id, "nonexistent", json!({}));
        assert_eq!(outcome.status, ProbeStatus::Error);
        assert!(outcome.error.unwrap().contains("nonexistent"));
    }

    #[test]
    fn unregistered_integration_type_is_an_error_outcome() {
        let store = Store::open_in_memory().unwrap();
        let cipher = SecretCipher::derive(b"test-master-secret", b"integration-secret");
        let sealed = seal(&cipher, json!({"base_url": "https://svc.example"}), HashMap::new());
        let integration = store
            .create_integration(NewIntegration { type_: "unregistered-type".into(), name: "svc".into(), config_encrypted: sealed })
            .unwrap();
        let registry = PackRegistry::new();
        let fetch: Arc<dyn HttpFetch> = Arc::new(FakeFetch::new(vec![]));
        let executor = IntegrationExecutor::new(registry, store, SecretCipher::derive(b"test-master-secret", b"integration-secret"), fetch);
        let outcome = executor.run(&integration.id, "check", json!({}));
        assert_eq!(outcome.status, ProbeStatus::Error);
    }

    #[test]
    fn per_integration_locks_are_distinct_instances() {
        let (executor, id) = executor_with_instance(vec![]);
        let guard_a = executor.lock_for(&id);
        drop(guard_a);
        let _guard_b = executor.lock_for(&id);
    }
}
