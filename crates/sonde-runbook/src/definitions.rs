//! Runbook definitions: manifest-style probe lists and diagnostic-handler
//! compositions (spec.md §4.G, §9 "named handler values keyed by
//! category").

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use sonde_core::Severity;

use crate::context::RunbookContext;

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub title: String,
    pub detail: String,
    pub remediation: Option<String>,
    pub related_probes: Vec<String>,
}

impl Finding {
    pub fn critical(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { severity: Severity::Critical, title: title.into(), detail: detail.into(), remediation: None, related_probes: Vec::new() }
    }

    pub fn warning(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, title: title.into(), detail: detail.into(), remediation: None, related_probes: Vec::new() }
    }

    pub fn info(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { severity: Severity::Info, title: title.into(), detail: detail.into(), remediation: None, related_probes: Vec::new() }
    }

    pub fn with_related_probe(mut self, probe: impl Into<String>) -> Self {
        self.related_probes.push(probe.into());
        self
    }
}

/// A domain-specific composition function: calls `context.run_probe` as
/// many times as it likes and builds findings from the results. Boxed and
/// `'static` so it can be registered once at startup and shared across
/// concurrent runs.
pub type DiagnosticHandler =
    Arc<dyn for<'a> Fn(&'a dyn RunbookContext, Value) -> BoxFuture<'a, Vec<Finding>> + Send + Sync>;

#[derive(Clone)]
pub enum RunbookDefinition {
    Manifest { category: String, probes: Vec<String>, parallel: bool },
    Diagnostic { category: String, required_params: Vec<String>, handler: DiagnosticHandler },
}

impl RunbookDefinition {
    pub fn category(&self) -> &str {
        match self {
            RunbookDefinition::Manifest { category, .. } => category,
            RunbookDefinition::Diagnostic { category, .. } => category,
        }
    }
}

/// A manifest-style reference runbook: runs `hub.version`, `hub.uptime`
/// and `hub.agent_count` in parallel, exercising the `parallel: true`
/// branch against the hub's own internal probes so the crate's tests
/// don't depend on a live agent or integration.
pub fn connectivity_runbook() -> RunbookDefinition {
    RunbookDefinition::Manifest {
        category: "connectivity".to_string(),
        probes: vec!["hub.version".to_string(), "hub.uptime".to_string(), "hub.agent_count".to_string()],
        parallel: true,
    }
}

/// A diagnostic-handler reference runbook: requires an `agent` parameter,
/// runs a `disk.usage` probe against it, and synthesises a finding keyed
/// off the returned percentage.
pub fn disk_health_runbook() -> RunbookDefinition {
    let handler: DiagnosticHandler = Arc::new(|context, params| {
        Box::pin(async move {
            let Some(agent) = params.get("agent").and_then(Value::as_str) else {
                return vec![Finding::critical("missing agent parameter", "disk-health requires an 'agent' parameter")];
            };
            let response = context.run_probe("disk.usage", Value::Null, Some(agent)).await;
            if response.status != sonde_core::ProbeStatus::Success {
                return vec![Finding::critical(
                    "disk.usage probe failed",
                    response.error.unwrap_or_else(|| "no error detail".to_string()),
                )
                .with_related_probe("disk.usage")];
            }
            let used_percent = response
                .data
                .as_ref()
                .and_then(|d| d.get("used_percent"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if used_percent >= 90.0 {
                vec![Finding::critical("disk nearly full", format!("{used_percent:.1}% used")).with_related_probe("disk.usage")]
            } else if used_percent >= 75.0 {
                vec![Finding::warning("disk usage elevated", format!("{used_percent:.1}% used")).with_related_probe("disk.usage")]
            } else {
                vec![Finding::info("disk usage nominal", format!("{used_percent:.1}% used")).with_related_probe("disk.usage")]
            }
        })
    });
    RunbookDefinition::Diagnostic {
        category: "disk-health".to_string(),
        required_params: vec!["agent".to_string()],
        handler,
    }
}
