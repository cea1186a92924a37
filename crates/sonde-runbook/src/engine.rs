//! Runbook execution (spec.md §4.G, §8 scenario 7).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use serde_json::Value;
use sonde_core::{ProbeStatus, Severity};
use sonde_router::ProbeResponse;

use crate::context::RunbookContext;
use crate::definitions::{Finding, RunbookDefinition};

#[derive(Debug, thiserror::Error)]
pub enum RunbookError {
    #[error("unknown runbook category '{0}'")]
    UnknownCategory(String),
}

/// One probe row collected while running a manifest runbook.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRow {
    pub probe: String,
    pub status: ProbeStatus,
    pub data: Option<Value>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FindingsCount {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

impl FindingsCount {
    fn tally(findings: &[Finding]) -> Self {
        let mut count = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::Info => count.info += 1,
                Severity::Warning => count.warning += 1,
                Severity::Critical => count.critical += 1,
            }
        }
        count
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRunbookResult {
    pub category: String,
    pub probes_run: usize,
    pub probes_succeeded: usize,
    pub probes_failed: usize,
    pub findings_count: FindingsCount,
    pub duration_ms: i64,
    pub summary_text: String,
    pub findings: Vec<Finding>,
    pub probe_rows: Vec<ProbeRow>,
}

/// Wraps a `RunbookContext` for the lifetime of a single diagnostic-handler
/// invocation, recording every `run_probe` call as a `ProbeRow` so the
/// engine can report `probesRun`/`probesSucceeded`/`probesFailed` for
/// diagnostic runbooks the same way it already does for manifest ones
/// (spec.md §4.G, §8 scenario 7). Built fresh per `run` call, so
/// concurrent runbook runs never share (and can't race on) the same
/// accumulator.
struct RecordingContext<'a> {
    inner: &'a dyn RunbookContext,
    rows: Mutex<Vec<ProbeRow>>,
}

impl<'a> RecordingContext<'a> {
    fn new(inner: &'a dyn RunbookContext) -> Self {
        Self { inner, rows: Mutex::new(Vec::new()) }
    }

    fn into_rows(self) -> Vec<ProbeRow> {
        self.rows.into_inner().expect("recording context mutex poisoned")
    }
}

impl<'a> RunbookContext for RecordingContext<'a> {
    fn run_probe<'b>(&'b self, probe: &'b str, params: Value, agent: Option<&'b str>) -> BoxFuture<'b, ProbeResponse> {
        Box::pin(async move {
            let response = self.inner.run_probe(probe, params, agent).await;
            self.rows.lock().unwrap().push(ProbeRow {
                probe: probe.to_string(),
                status: response.status,
                data: response.data.clone(),
                duration_ms: response.duration_ms,
            });
            response
        })
    }

    fn connected_agents(&self) -> Vec<String> {
        self.inner.connected_agents()
    }
}

/// Loads runbook definitions at startup and runs them by category
/// (spec.md §4.G).
pub struct RunbookEngine {
    definitions: HashMap<String, RunbookDefinition>,
    context: Box<dyn RunbookContext>,
}

impl RunbookEngine {
    pub fn new(context: Box<dyn RunbookContext>, definitions: Vec<RunbookDefinition>) -> Self {
        let definitions = definitions.into_iter().map(|d| (d.category().to_string(), d)).collect();
        Self { definitions, context }
    }

    pub fn categories(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub async fn run(&self, category: &str, params: Value) -> Result<DiagnosticRunbookResult, RunbookError> {
        let started = Instant::now();
        let definition = self
            .definitions
            .get(category)
            .ok_or_else(|| RunbookError::UnknownCategory(category.to_string()))?;

        let (probe_rows, findings) = match definition {
            RunbookDefinition::Manifest { probes, parallel, .. } => {
                let rows = self.run_manifest(probes, params, *parallel).await;
                let findings = rows
                    .iter()
                    .filter(|r| r.status != ProbeStatus::Success)
                    .map(|r| {
                        Finding::warning(format!("probe '{}' failed", r.probe), r.data.as_ref().map(|d| d.to_string()).unwrap_or_default())
                            .with_related_probe(r.probe.clone())
                    })
                    .collect();
                (rows, findings)
            }
            RunbookDefinition::Diagnostic { required_params, handler, .. } => {
                if let Some(missing) = required_params.iter().find(|p| params.get(p.as_str()).is_none()) {
                    let findings = vec![Finding::critical(
                        "missing required parameter",
                        format!("runbook '{category}' requires parameter '{missing}'"),
                    )];
                    (Vec::new(), findings)
                } else {
                    let recorder = RecordingContext::new(self.context.as_ref());
                    let findings = handler(&recorder, params).await;
                    (recorder.into_rows(), findings)
                }
            }
        };

        let probes_run = probe_rows.len();
        let probes_succeeded = probe_rows.iter().filter(|r| r.status == ProbeStatus::Success).count();
        let probes_failed = probes_run - probes_succeeded;
        let findings_count = FindingsCount::tally(&findings);
        let duration_ms = started.elapsed().as_millis() as i64;
        let summary_text = format!(
            "{probes_run} probe(s) run, {probes_succeeded} succeeded, {probes_failed} failed, \
             {} finding(s) ({} critical)",
            findings.len(),
            findings_count.critical
        );

        Ok(DiagnosticRunbookResult {
            category: category.to_string(),
            probes_run,
            probes_succeeded,
            probes_failed,
            findings_count,
            duration_ms,
            summary_text,
            findings,
            probe_rows,
        })
    }

    async fn run_manifest(&self, probes: &[String], params: Value, parallel: bool) -> Vec<ProbeRow> {
        if parallel {
            let futures = probes.iter().map(|probe| {
                let params = params.clone();
                async move {
                    let response = self.context.run_probe(probe, params, None).await;
                    ProbeRow { probe: probe.clone(), status: response.status, data: response.data, duration_ms: response.duration_ms }
                }
            });
            join_all(futures).await
        } else {
            let mut rows = Vec::with_capacity(probes.len());
            for probe in probes {
                let response = self.context.run_probe(probe, params.clone(), None).await;
                rows.push(ProbeRow { probe: probe.clone(), status: response.status, data: response.data, duration_ms: response.duration_ms });
            }
            rows
        }
    }
}
