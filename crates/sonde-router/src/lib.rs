//! Probe name resolution: integration packs, agents, internal diagnostics
//! (spec.md §4.F).

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sonde_audit::{AuditError, AuditLedger, NewAuditEntry};
use sonde_core::{HubError, ProbeStatus};
use sonde_dispatcher::{DispatchError, Dispatcher};
use sonde_integrations::IntegrationExecutor;
use sonde_trending::TrendingStore;
use sonde_store::probe_result::NewProbeResult;

const DEFAULT_AGENT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no route for probe '{0}'")]
    NoRoute(String),
}

impl From<RouteError> for HubError {
    fn from(err: RouteError) -> Self {
        HubError::NotFound(err.to_string())
    }
}

/// The resolved result of a single `execute` call, regardless of which
/// branch served it.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: ProbeStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

fn internal_probe_names() -> &'static [&'static str] {
    &["hub.version", "hub.uptime", "hub.agent_count"]
}

/// Splits a probe name into `(instance selector, handler name)` on the
/// first `.` (spec.md §4.F step 1: "integration-pack prefix"). The prefix
/// names a configured integration *instance* (its `id` or its unique
/// `name`, e.g. `"prod-api"`), not the pack `type` — an instance's type is
/// resolved afterwards from the integration row itself, mirroring how an
/// operator actually addresses a probe (`"prod-api.check"`, not
/// `"http-probe.check"`, since two instances can share a type). A probe
/// with no `.` never names an integration.
fn split_integration_probe(probe: &str) -> Option<(&str, &str)> {
    probe.split_once('.').filter(|(instance, handler)| !instance.is_empty() && !handler.is_empty())
}

/// Resolves and executes a probe by name against the right backend,
/// recording a `ProbeResult` and an `AuditEntry` for every attempt,
/// success or failure (spec.md §4.F, §8).
pub struct ProbeRouter {
    dispatcher: Dispatcher,
    executor: IntegrationExecutor,
    trending: TrendingStore,
    audit: AuditLedger,
    start_time: Instant,
    version: &'static str,
}

impl ProbeRouter {
    pub fn new(dispatcher: Dispatcher, executor: IntegrationExecutor, trending: TrendingStore, audit: AuditLedger) -> Self {
        Self {
            dispatcher,
            executor,
            trending,
            audit,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub async fn execute(&self, probe: &str, params: Value, agent: Option<&str>) -> ProbeResponse {
        let started = Instant::now();
        let outcome = self.resolve(probe, params.clone(), agent).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let response = match outcome {
            Ok(data) => ProbeResponse { status: ProbeStatus::Success, data: Some(data), error: None, duration_ms },
            Err((status, message)) => ProbeResponse { status, data: None, error: Some(message), duration_ms },
        };

        self.record(probe, agent, &params, &response);
        response
    }

    async fn resolve(&self, probe: &str, params: Value, agent: Option<&str>) -> Result<Value, (ProbeStatus, String)> {
        let pack_match = split_integration_probe(probe).filter(|(instance, _)| self.executor.instance_exists(instance));

        if agent.is_none() {
            if let Some((instance, handler)) = pack_match {
                let outcome = self.executor.run(instance, handler, params);
                return match outcome.status {
                    ProbeStatus::Success => Ok(outcome.data.unwrap_or(Value::Null)),
                    _ => Err((outcome.status, outcome.error.unwrap_or_else(|| "integration error".into()))),
                };
            }
        }

        if let Some(agent_name) = agent {
            return self
                .dispatcher
                .call(agent_name, probe, params, DEFAULT_AGENT_CALL_TIMEOUT)
                .await
                .map_err(|err| (dispatch_status(&err), err.to_string()));
        }

        if internal_probe_names().contains(&probe) {
            return Ok(self.run_internal(probe));
        }

        Err((ProbeStatus::Error, RouteError::NoRoute(probe.to_string()).to_string()))
    }

    fn run_internal(&self, probe: &str) -> Value {
        match probe {
            "hub.version" => json!({"version": self.version}),
            "hub.uptime" => json!({"uptime_seconds": self.start_time.elapsed().as_secs()}),
            "hub.agent_count" => json!({"online": self.dispatcher.list_online_agents().len()}),
            other => json!({"error": format!("unregistered internal probe '{other}'")}),
        }
    }

    fn record(&self, probe: &str, agent: Option<&str>, params: &Value, response: &ProbeResponse) {
        let data_json = response.data.as_ref().map(|d| d.to_string());
        if let Err(err) = self.trending.record(NewProbeResult {
            probe: probe.to_string(),
            agent: agent.map(str::to_string),
            integration_id: None,
            status: response.status,
            duration_ms: response.duration_ms,
            data_json,
            error_text: response.error.clone(),
        }) {
            tracing::warn!(probe, ?err, "failed to record probe result");
        }

        let append_result = self.audit.append(NewAuditEntry {
            api_key_id: None,
            agent_id: agent.map(str::to_string),
            probe: probe.to_string(),
            status: response.status,
            duration_ms: response.duration_ms,
            request_json: Some(params.to_string()),
            response_json: response.data.as_ref().map(|d| d.to_string()),
        });
        if let Err(err) = append_result {
            log_audit_failure(probe, err);
        }
    }
}

fn log_audit_failure(probe: &str, err: AuditError) {
    tracing::error!(probe, ?err, "failed to append audit entry for probe execution");
}

fn dispatch_status(err: &DispatchError) -> ProbeStatus {
    match err {
        DispatchError::Timeout => ProbeStatus::Timeout,
        _ => ProbeStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sonde_crypto::{MessageSigner, SecretCipher};
    use sonde_integrations::{default_registry, HttpFetch, HttpResponse, PackError};
    use sonde_store::integration::NewIntegration;
    use sonde_store::Store;
    use std::sync::Arc;

    struct StubFetch;
    impl HttpFetch for StubFetch {
        fn request(&self, _method: &str, _url: &str, _headers: &[(String, String)], _body: Option<Vec<u8>>) -> Result<HttpResponse, PackError> {
            Ok(HttpResponse { status: 200, body: b"ok".to_vec() })
        }
    }

    fn router() -> ProbeRouter {
        let store = Store::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new(store.clone(), MessageSigner::generate());
        let cipher = SecretCipher::derive(b"test-master", b"integration-secret");
        let fetch: Arc<dyn HttpFetch> = Arc::new(StubFetch);
        let executor = IntegrationExecutor::new(default_registry(), store.clone(), cipher, fetch);
        let trending = TrendingStore::new(store.clone());
        let audit = AuditLedger::new(store);
        ProbeRouter::new(dispatcher, executor, trending, audit)
    }

    #[tokio::test]
    async fn an_unroutable_probe_fails_no_route() {
        let router = router();
        let response = router.execute("totally.unknown", json!({}), None).await;
        assert_eq!(response.status, ProbeStatus::Error);
        assert!(response.error.unwrap().contains("no route"));
    }

    #[tokio::test]
    async fn internal_probes_resolve_locally() {
        let router = router();
        let response = router.execute("hub.version", json!({}), None).await;
        assert_eq!(response.status, ProbeStatus::Success);
        assert!(response.data.unwrap()["version"].is_string());
    }

    #[tokio::test]
    async fn an_agent_set_routes_to_the_dispatcher_and_fails_offline() {
        let router = router();
        let response = router.execute("ping", json!({}), Some("edge-01")).await;
        assert_eq!(response.status, ProbeStatus::Error);
    }

    #[tokio::test]
    async fn every_execute_call_records_a_probe_result_and_an_audit_entry() {
        let store = Store::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new(store.clone(), MessageSigner::generate());
        let cipher = SecretCipher::derive(b"test-master", b"integration-secret");
        let fetch: Arc<dyn HttpFetch> = Arc::new(StubFetch);
        let executor = IntegrationExecutor::new(default_registry(), store.clone(), cipher, fetch);
        let trending = TrendingStore::new(store.clone());
        let audit = AuditLedger::new(store.clone());
        let router = ProbeRouter::new(dispatcher, executor, trending, audit);

        router.execute("hub.version", json!({}), None).await;
        router.execute("hub.uptime", json!({}), None).await;

        assert_eq!(store.list_probe_results_since("1970-01-01T00:00:00.000Z").unwrap().len(), 2);
        assert_eq!(store.list_audit_rows().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn an_integration_probe_routes_to_the_executor() {
        let store = Store::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new(store.clone(), MessageSigner::generate());
        let cipher = SecretCipher::derive(b"test-master", b"integration-secret");
        let payload = serde_json::to_vec(&json!({"config": {"base_url": "https://svc.example"}, "credentials": {}})).unwrap();
        let sealed = cipher.seal(&payload).unwrap();
        store.create_integration(NewIntegration { type_: "http-probe".into(), name: "prod-api".into(), config_encrypted: sealed }).unwrap();
        let fetch: Arc<dyn HttpFetch> = Arc::new(StubFetch);
        let executor = IntegrationExecutor::new(default_registry(), store.clone(), cipher, fetch);
        let trending = TrendingStore::new(store.clone());
        let audit = AuditLedger::new(store.clone());
        let router = ProbeRouter::new(dispatcher, executor, trending, audit);

        let response = router.execute("prod-api.check", json!({"path": "/"}), None).await;
        assert_eq!(response.status, ProbeStatus::Success);
    }

    #[tokio::test]
    async fn a_probe_naming_an_unconfigured_instance_falls_through_to_no_route() {
        let router = router();
        let response = router.execute("nonexistent-instance.check", json!({}), None).await;
        assert_eq!(response.status, ProbeStatus::Error);
        assert!(response.error.unwrap().contains("no route"));
    }
}
