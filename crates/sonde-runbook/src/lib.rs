//! Runbook execution: manifest probe lists and diagnostic handlers composed
//! into findings (spec.md §4.G).

pub mod context;
pub mod definitions;
pub mod engine;

pub use context::{RouterContext, RunbookContext};
pub use definitions::{connectivity_runbook, disk_health_runbook, DiagnosticHandler, Finding, RunbookDefinition};
pub use engine::{DiagnosticRunbookResult, FindingsCount, ProbeRow, RunbookEngine, RunbookError};

/// The runbooks shipped with the hub out of the box.
pub fn default_definitions() -> Vec<RunbookDefinition> {
    vec![connectivity_runbook(), disk_health_runbook()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::{json, Value};
    use sonde_core::ProbeStatus;
    use sonde_router::ProbeResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A context whose `run_probe` is scripted by test cases rather than
    /// routed through a real `ProbeRouter`, so a runbook's control flow can
    /// be exercised without standing up a store, dispatcher, and executor.
    struct ScriptedContext {
        responses: Arc<dyn Fn(&str, &Value, Option<&str>) -> ProbeResponse + Send + Sync>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedContext {
        fn new(responses: impl Fn(&str, &Value, Option<&str>) -> ProbeResponse + Send + Sync + 'static) -> Self {
            Self { responses: Arc::new(responses), calls: Arc::new(AtomicUsize::new(0)) }
        }
    }

    impl RunbookContext for ScriptedContext {
        fn run_probe<'a>(&'a self, probe: &'a str, params: Value, agent: Option<&'a str>) -> BoxFuture<'a, ProbeResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = (self.responses)(probe, &params, agent);
            Box::pin(async move { response })
        }

        fn connected_agents(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn success(data: Value) -> ProbeResponse {
        ProbeResponse { status: ProbeStatus::Success, data: Some(data), error: None, duration_ms: 1 }
    }

    fn unreachable(message: &str) -> ProbeResponse {
        ProbeResponse { status: ProbeStatus::Error, data: None, error: Some(message.to_string()), duration_ms: 1 }
    }

    #[tokio::test]
    async fn connectivity_runbook_runs_all_three_probes_in_parallel() {
        let context = ScriptedContext::new(|probe, _params, _agent| match probe {
            "hub.version" => success(json!({"version": "1.0.0"})),
            "hub.uptime" => success(json!({"uptime_seconds": 42})),
            "hub.agent_count" => success(json!({"online": 3})),
            other => unreachable!("unexpected probe {other}"),
        });
        let calls = context.calls.clone();
        let engine = RunbookEngine::new(Box::new(context), default_definitions());

        let result = engine.run("connectivity", Value::Null).await.unwrap();

        assert_eq!(result.probes_run, 3);
        assert_eq!(result.probes_succeeded, 3);
        assert_eq!(result.probes_failed, 0);
        assert!(result.findings.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disk_health_without_agent_param_yields_one_critical_finding_and_no_probes() {
        let context = ScriptedContext::new(|_probe, _params, _agent| success(json!({})));
        let calls = context.calls.clone();
        let engine = RunbookEngine::new(Box::new(context), default_definitions());

        let result = engine.run("disk-health", json!({})).await.unwrap();

        assert_eq!(result.probes_run, 0);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, sonde_core::Severity::Critical);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disk_health_against_an_unreachable_agent_is_localized_and_still_returns_ok() {
        let context = ScriptedContext::new(|_probe, _params, _agent| unreachable("agent offline"));
        let engine = RunbookEngine::new(Box::new(context), default_definitions());

        let result = engine.run("disk-health", json!({"agent": "edge-01"})).await.unwrap();

        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, sonde_core::Severity::Critical);
        assert!(result.findings[0].detail.contains("agent offline"));
        // spec.md §8 scenario 7: a diagnostic runbook's probe counts must
        // reflect every `run_probe` call the handler made, not just
        // manifest runbooks.
        assert_eq!(result.probes_run, 1);
        assert_eq!(result.probes_succeeded, 0);
        assert_eq!(result.probes_failed, 1);
    }

    #[tokio::test]
    async fn disk_health_reports_a_successful_probe_count_when_the_agent_responds() {
        let context = ScriptedContext::new(|_probe, _params, _agent| success(json!({"used_percent": 10.0})));
        let engine = RunbookEngine::new(Box::new(context), default_definitions());

        let result = engine.run("disk-health", json!({"agent": "edge-01"})).await.unwrap();

        assert_eq!(result.probes_run, 1);
        assert_eq!(result.probes_succeeded, 1);
        assert_eq!(result.probes_failed, 0);
    }

    #[tokio::test]
    async fn disk_health_severity_escalates_with_used_percent() {
        let engine_for = |used_percent: f64| {
            let context = ScriptedContext::new(move |_probe, _params, _agent| success(json!({"used_percent": used_percent})));
            RunbookEngine::new(Box::new(context), default_definitions())
        };

        let critical = engine_for(95.0).run("disk-health", json!({"agent": "edge-01"})).await.unwrap();
        assert_eq!(critical.findings[0].severity, sonde_core::Severity::Critical);

        let warning = engine_for(80.0).run("disk-health", json!({"agent": "edge-01"})).await.unwrap();
        assert_eq!(warning.findings[0].severity, sonde_core::Severity::Warning);

        let info = engine_for(10.0).run("disk-health", json!({"agent": "edge-01"})).await.unwrap();
        assert_eq!(info.findings[0].severity, sonde_core::Severity::Info);
    }

    #[tokio::test]
    async fn unreachable_probe_failure_is_localized_while_remaining_probes_still_run() {
        let context = ScriptedContext::new(|probe, _params, _agent| match probe {
            "hub.version" => unreachable("network unreachable"),
            "hub.uptime" => success(json!({"uptime_seconds": 1})),
            "hub.agent_count" => success(json!({"online": 0})),
            other => unreachable!("unexpected probe {other}"),
        });
        let engine = RunbookEngine::new(Box::new(context), default_definitions());

        let result = engine.run("connectivity", Value::Null).await.unwrap();

        assert_eq!(result.probes_run, 3);
        assert_eq!(result.probes_succeeded, 2);
        assert_eq!(result.probes_failed, 1);
        assert_eq!(result.findings.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_severity_and_title_findings_are_preserved_not_deduplicated() {
        let context = ScriptedContext::new(|_probe, _params, _agent| unreachable("same failure twice"));
        let engine = RunbookEngine::new(Box::new(context), default_definitions());

        let result = engine.run("connectivity", Value::Null).await.unwrap();

        let duplicate_titles = result.findings.iter().filter(|f| f.title == "probe 'hub.version' failed").count()
            + result.findings.iter().filter(|f| f.title == "probe 'hub.uptime' failed").count()
            + result.findings.iter().filter(|f| f.title == "probe 'hub.agent_count' failed").count();
        assert_eq!(duplicate_titles, 3);
        assert_eq!(result.findings.len(), 3);
    }

    #[tokio::test]
    async fn unknown_category_is_rejected() {
        let context = ScriptedContext::new(|_probe, _params, _agent| success(json!({})));
        let engine = RunbookEngine::new(Box::new(context), default_definitions());

        let err = engine.run("does-not-exist", Value::Null).await.unwrap_err();
        assert!(matches!(err, RunbookError::UnknownCategory(category) if category == "does-not-exist"));
    }
}
