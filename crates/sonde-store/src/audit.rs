//! Raw audit-log row storage (spec.md §3 AuditEntry, §4.C). Hash-chain
//! computation lives in the audit crate; this module only persists and
//! walks rows in `id` order.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{Store, StoreError};

/// A stored audit row, field order matching the canonical hash-chain
/// input exactly: `(id, timestamp, api_key_id, agent_id, probe, status,
/// duration_ms, request_json, response_json, prev_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: i64,
    pub timestamp: String,
    pub api_key_id: Option<String>,
    pub agent_id: Option<String>,
    pub probe: String,
    pub status: String,
    pub duration_ms: i64,
    pub request_json: Option<String>,
    pub response_json: Option<String>,
    pub prev_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewAuditRow {
    pub timestamp: String,
    pub api_key_id: Option<String>,
    pub agent_id: Option<String>,
    pub probe: String,
    pub status: String,
    pub duration_ms: i64,
    pub request_json: Option<String>,
    pub response_json: Option<String>,
}

const AUDIT_COLUMNS: &str =
    "id, timestamp, api_key_id, agent_id, probe, status, duration_ms, request_json, response_json, prev_hash";

fn row_to_audit(row: &Row) -> rusqlite::Result<AuditRow> {
    Ok(AuditRow {
        id: row.get("id")?,
        timestamp: row.get("timestamp")?,
        api_key_id: row.get("api_key_id")?,
        agent_id: row.get("agent_id")?,
        probe: row.get("probe")?,
        status: row.get("status")?,
        duration_ms: row.get("duration_ms")?,
        request_json: row.get("request_json")?,
        response_json: row.get("response_json")?,
        prev_hash: row.get("prev_hash")?,
    })
}

impl Store {
    /// Returns the highest-`id` row, if any, used by the audit crate to
    /// compute the next row's `prev_hash`.
    pub fn get_last_audit_row(&self) -> Result<Option<AuditRow>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY id DESC LIMIT 1"),
            [],
            row_to_audit,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn insert_audit_row(&self, new: NewAuditRow, prev_hash: &str) -> Result<AuditRow, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_log (timestamp, api_key_id, agent_id, probe, status, duration_ms, \
             request_json, response_json, prev_hash) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.timestamp,
                new.api_key_id,
                new.agent_id,
                new.probe,
                new.status,
                new.duration_ms,
                new.request_json,
                new.response_json,
                prev_hash,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(AuditRow {
            id,
            timestamp: new.timestamp,
            api_key_id: new.api_key_id,
            agent_id: new.agent_id,
            probe: new.probe,
            status: new.status,
            duration_ms: new.duration_ms,
            request_json: new.request_json,
            response_json: new.response_json,
            prev_hash: prev_hash.to_string(),
        })
    }

    pub fn list_audit_rows(&self) -> Result<Vec<AuditRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY id ASC"))?;
        let rows = stmt.query_map([], row_to_audit)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewAuditRow {
        NewAuditRow {
            timestamp: "2026-01-01T00:00:00.000Z".into(),
            api_key_id: None,
            agent_id: Some("edge-01".into()),
            probe: "ping".into(),
            status: "success".into(),
            duration_ms: 5,
            request_json: None,
            response_json: None,
        }
    }

    #[test]
    fn last_row_is_none_until_one_exists() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_last_audit_row().unwrap().is_none());
        store.insert_audit_row(sample(), "").unwrap();
        assert!(store.get_last_audit_row().unwrap().is_some());
    }

    #[test]
    fn rows_come_back_in_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        store.insert_audit_row(sample(), "").unwrap();
        store.insert_audit_row(sample(), "abc").unwrap();
        let rows = store.list_audit_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].id < rows[1].id);
    }
}
