//! Store error taxonomy (SPEC_FULL.md §3), mapping into `sonde_core::HubError`
//! at the crate boundary so every other module reports through one kind.

use sonde_core::HubError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => HubError::NotFound(msg),
            StoreError::Conflict(msg) => HubError::Conflict(msg),
            StoreError::Sqlite(e) => HubError::Internal(format!("sqlite: {e}")),
            StoreError::Serde(e) => HubError::Internal(format!("serde: {e}")),
        }
    }
}
