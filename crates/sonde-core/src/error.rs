//! Error taxonomy shared across the hub (spec.md §7).
//!
//! Every crate defines its own fine-grained error enum at its module
//! boundary; those enums carry a `From` impl into `HubError` so the
//! outermost MCP/HTTP surface can report a single, structured kind without
//! losing the underlying message.

use thiserror::Error;

/// Structured error kind propagated to callers, matching spec.md §7's
/// taxonomy exactly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorised: {0}")]
    Unauthorised(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("decrypt failure: {0}")]
    Decrypt(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Short machine-readable kind tag, used in audit entries and MCP
    /// error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::Validation(_) => "validation",
            HubError::NotFound(_) => "not-found",
            HubError::Conflict(_) => "conflict",
            HubError::Unauthorised(_) => "unauthorised",
            HubError::Forbidden(_) => "forbidden",
            HubError::Timeout(_) => "timeout",
            HubError::Unreachable(_) => "unreachable",
            HubError::Decrypt(_) => "decrypt",
            HubError::Internal(_) => "internal",
        }
    }

    /// Whether this error kind should be recovered locally inside a
    /// runbook (synthesised into a finding) rather than surfaced to the
    /// caller as a failed request (spec.md §7 propagation policy).
    pub fn recoverable_in_runbook(&self) -> bool {
        matches!(self, HubError::Timeout(_) | HubError::Unreachable(_))
    }
}
