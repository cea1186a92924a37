//! Hash-chained audit ledger (spec.md §3 AuditEntry, §4.C, §8).
//!
//! For entry *n > 1*, `prevHash = SHA-256(canonical(entry n-1))`; for
//! *n = 1*, `prevHash = ""`. The canonical form is computed over the
//! **stored row including its own `id`** (spec.md §9 Open Questions).

use serde::Serialize;
use sha2::{Digest, Sha256};
use sonde_core::{canonical::canonical_json_bytes, now_iso8601, HubError, ProbeStatus};
use sonde_store::audit::{AuditRow, NewAuditRow};
use sonde_store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("canonicalisation failed: {0}")]
    Canonical(#[from] HubError),
}

impl From<AuditError> for HubError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Store(e) => e.into(),
            AuditError::Canonical(e) => e,
        }
    }
}

/// A persisted audit entry, as returned to callers.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub api_key_id: Option<String>,
    pub agent_id: Option<String>,
    pub probe: String,
    pub status: ProbeStatus,
    pub duration_ms: i64,
    pub request_json: Option<String>,
    pub response_json: Option<String>,
    pub prev_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub api_key_id: Option<String>,
    pub agent_id: Option<String>,
    pub probe: String,
    pub status: ProbeStatus,
    pub duration_ms: i64,
    pub request_json: Option<String>,
    pub response_json: Option<String>,
}

/// The exact canonical shape hashed into the chain: field order fixed by
/// declaration, including the row's own `id` (spec.md §9).
#[derive(Serialize)]
struct CanonicalRow<'a> {
    id: i64,
    timestamp: &'a str,
    api_key_id: &'a Option<String>,
    agent_id: &'a Option<String>,
    probe: &'a str,
    status: &'a str,
    duration_ms: i64,
    request_json: &'a Option<String>,
    response_json: &'a Option<String>,
    prev_hash: &'a str,
}

fn hash_row(row: &AuditRow) -> Result<String, HubError> {
    let canonical = CanonicalRow {
        id: row.id,
        timestamp: &row.timestamp,
        api_key_id: &row.api_key_id,
        agent_id: &row.agent_id,
        probe: &row.probe,
        status: &row.status,
        duration_ms: row.duration_ms,
        request_json: &row.request_json,
        response_json: &row.response_json,
        prev_hash: &row.prev_hash,
    };
    let bytes = canonical_json_bytes(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn to_entry(row: AuditRow) -> AuditEntry {
    AuditEntry {
        id: row.id,
        timestamp: row.timestamp,
        api_key_id: row.api_key_id,
        agent_id: row.agent_id,
        probe: row.probe,
        status: row.status.parse().unwrap_or(ProbeStatus::Error),
        duration_ms: row.duration_ms,
        request_json: row.request_json,
        response_json: row.response_json,
        prev_hash: row.prev_hash,
    }
}

/// The outcome of a full-chain verification pass (spec.md §4.C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid,
    Broken { broken_at: i64 },
}

/// Thin wrapper over the store exposing the hash-chained append/verify
/// contract. Every append happens under the store's single writer mutex,
/// so "read last row, compute hash, insert" never races (spec.md §4.C
/// step 1-3 are effectively atomic).
pub struct AuditLedger {
    store: Store,
}

impl AuditLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, AuditError> {
        let last = self.store.get_last_audit_row()?;
        let prev_hash = match &last {
            None => String::new(),
            Some(row) => hash_row(row)?,
        };
        let new_row = NewAuditRow {
            timestamp: now_iso8601(),
            api_key_id: entry.api_key_id,
            agent_id: entry.agent_id,
            probe: entry.probe,
            status: entry.status.as_str().to_string(),
            duration_ms: entry.duration_ms,
            request_json: entry.request_json,
            response_json: entry.response_json,
        };
        let stored = self.store.insert_audit_row(new_row, &prev_hash)?;
        Ok(to_entry(stored))
    }

    /// Walks the table in `id` ascending order, recomputing each row's
    /// expected `prev_hash` from the previous row.
    pub fn verify(&self) -> Result<VerifyResult, AuditError> {
        let rows = self.store.list_audit_rows()?;
        let mut expected_prev_hash = String::new();
        for row in &rows {
            if row.prev_hash != expected_prev_hash {
                return Ok(VerifyResult::Broken { broken_at: row.id });
            }
            expected_prev_hash = hash_row(row)?;
        }
        Ok(VerifyResult::Valid)
    }

    pub fn list(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.store.list_audit_rows()?.into_iter().map(to_entry).collect())
    }
}
