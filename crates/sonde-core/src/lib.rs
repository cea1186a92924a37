//! Shared primitives for Sonde Hub.
//!
//! Nothing in this crate performs I/O: it is the error taxonomy every other
//! crate's error type converts into at its outermost boundary, plus the
//! time and canonical-JSON helpers the audit ledger and message signing
//! both depend on.

pub mod canonical;
pub mod error;
pub mod time;

pub use canonical::canonical_json_bytes;
pub use error::HubError;
pub use time::{current_timestamp_millis, now_iso8601, parse_iso8601};

/// The two kinds of entity a tag can attach to (spec.md §3 Tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Agent,
    Integration,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Agent => "agent",
            EntityKind::Integration => "integration",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(EntityKind::Agent),
            "integration" => Ok(EntityKind::Integration),
            other => Err(HubError::Validation(format!("unknown entity kind: {other}"))),
        }
    }
}

/// Outcome status of a single probe invocation (spec.md §3 ProbeResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Error,
    Timeout,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::Error => "error",
            ProbeStatus::Timeout => "timeout",
        }
    }
}

impl std::str::FromStr for ProbeStatus {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ProbeStatus::Success),
            "error" => Ok(ProbeStatus::Error),
            "timeout" => Ok(ProbeStatus::Timeout),
            other => Err(HubError::Validation(format!("unknown probe status: {other}"))),
        }
    }
}

/// Agent connectivity status tracked by the dispatcher and persisted on the
/// agent row (spec.md §3 Agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Degraded,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(AgentStatus::Online),
            "degraded" => Ok(AgentStatus::Degraded),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(HubError::Validation(format!("unknown agent status: {other}"))),
        }
    }
}

/// Integration test-connection status (spec.md §3 Integration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Untested,
    Ok,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Untested => "untested",
            IntegrationStatus::Ok => "ok",
            IntegrationStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for IntegrationStatus {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untested" => Ok(IntegrationStatus::Untested),
            "ok" => Ok(IntegrationStatus::Ok),
            "error" => Ok(IntegrationStatus::Error),
            other => Err(HubError::Validation(format!(
                "unknown integration status: {other}"
            ))),
        }
    }
}

/// Severity of a runbook finding (spec.md GLOSSARY "Finding").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}
