//! Raw rolling probe-result storage (spec.md §3 ProbeResult, §4.I).
//!
//! This module only provides insert/query/evict primitives; the 24h
//! retention policy and aggregate bucketing live in the trending crate
//! that wraps this store.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use sonde_core::{now_iso8601, ProbeStatus};

use crate::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: i64,
    pub probe: String,
    pub agent: Option<String>,
    pub integration_id: Option<String>,
    pub status: ProbeStatus,
    pub duration_ms: i64,
    pub data_json: Option<String>,
    pub error_text: Option<String>,
    pub ts: String,
}

#[derive(Debug, Clone)]
pub struct NewProbeResult {
    pub probe: String,
    pub agent: Option<String>,
    pub integration_id: Option<String>,
    pub status: ProbeStatus,
    pub duration_ms: i64,
    pub data_json: Option<String>,
    pub error_text: Option<String>,
}

const PROBE_RESULT_COLUMNS: &str = "id, probe, agent, integration_id, status, duration_ms, data_json, error_text, ts";

fn row_to_probe_result(row: &Row) -> rusqlite::Result<ProbeResult> {
    let status_str: String = row.get("status")?;
    Ok(ProbeResult {
        id: row.get("id")?,
        probe: row.get("probe")?,
        agent: row.get("agent")?,
        integration_id: row.get("integration_id")?,
        status: status_str.parse().unwrap_or(ProbeStatus::Error),
        duration_ms: row.get("duration_ms")?,
        data_json: row.get("data_json")?,
        error_text: row.get("error_text")?,
        ts: row.get("ts")?,
    })
}

impl Store {
    pub fn insert_probe_result(&self, new: NewProbeResult) -> Result<ProbeResult, StoreError> {
        let conn = self.conn.lock();
        let ts = now_iso8601();
        conn.execute(
            "INSERT INTO probe_results (probe, agent, integration_id, status, duration_ms, data_json, error_text, ts) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![new.probe, new.agent, new.integration_id, new.status.as_str(), new.duration_ms, new.data_json, new.error_text, ts],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        Ok(ProbeResult {
            id,
            probe: new.probe,
            agent: new.agent,
            integration_id: new.integration_id,
            status: new.status,
            duration_ms: new.duration_ms,
            data_json: new.data_json,
            error_text: new.error_text,
            ts,
        })
    }

    /// Deletes rows older than `cutoff` (an ISO-8601 timestamp), returning
    /// the number of rows removed.
    pub fn evict_probe_results_before(&self, cutoff: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM probe_results WHERE ts < ?1", params![cutoff])?;
        Ok(changed)
    }

    pub fn list_probe_results_by_probe_since(&self, probe: &str, since: &str) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROBE_RESULT_COLUMNS} FROM probe_results WHERE probe = ?1 AND ts >= ?2 ORDER BY ts"
        ))?;
        let rows = stmt.query_map(params![probe, since], row_to_probe_result)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    pub fn list_probe_results_by_agent_since(&self, agent: &str, since: &str) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROBE_RESULT_COLUMNS} FROM probe_results WHERE agent = ?1 AND ts >= ?2 ORDER BY ts"
        ))?;
        let rows = stmt.query_map(params![agent, since], row_to_probe_result)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    pub fn list_probe_results_since(&self, since: &str) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROBE_RESULT_COLUMNS} FROM probe_results WHERE ts >= ?1 ORDER BY ts"
        ))?;
        let rows = stmt.query_map(params![since], row_to_probe_result)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(probe: &str) -> NewProbeResult {
        NewProbeResult {
            probe: probe.into(),
            agent: Some("edge-01".into()),
            integration_id: None,
            status: ProbeStatus::Success,
            duration_ms: 12,
            data_json: Some("{}".into()),
            error_text: None,
        }
    }

    #[test]
    fn inserts_and_lists_since() {
        let store = Store::open_in_memory().unwrap();
        store.insert_probe_result(sample("ping")).unwrap();
        let results = store.list_probe_results_by_probe_since("ping", "1970-01-01T00:00:00.000Z").unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn evicts_rows_older_than_cutoff() {
        let store = Store::open_in_memory().unwrap();
        store.insert_probe_result(sample("ping")).unwrap();
        let evicted = store.evict_probe_results_before("9999-01-01T00:00:00.000Z").unwrap();
        assert_eq!(evicted, 1);
        assert!(store
            .list_probe_results_since("1970-01-01T00:00:00.000Z")
            .unwrap()
            .is_empty());
    }
}
