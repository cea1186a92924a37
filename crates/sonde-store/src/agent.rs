//! Agent entity CRUD (spec.md §3 Agent).

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sonde_core::{now_iso8601, AgentStatus};

use crate::{Store, StoreError};

/// One entry in an agent's installed-pack inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackEntry {
    pub name: String,
    pub version: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub last_seen: Option<String>,
    pub os: Option<String>,
    pub agent_version: Option<String>,
    pub packs: Vec<PackEntry>,
    pub cert_pem: Option<String>,
    pub cert_fingerprint: Option<String>,
    pub attestation_json: Option<String>,
    pub attestation_mismatch: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields supplied when an agent first enrolls; everything else is
/// populated by the dispatcher and the agent's own attestation reports.
#[derive(Debug, Clone, Default)]
pub struct NewAgent {
    pub name: String,
    pub os: Option<String>,
    pub agent_version: Option<String>,
}

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    let status_str: String = row.get("status")?;
    let packs_json: String = row.get("packs_json")?;
    Ok(Agent {
        id: row.get("id")?,
        name: row.get("name")?,
        status: status_str
            .parse()
            .unwrap_or(AgentStatus::Offline),
        last_seen: row.get("last_seen")?,
        os: row.get("os")?,
        agent_version: row.get("agent_version")?,
        packs: serde_json::from_str(&packs_json).unwrap_or_default(),
        cert_pem: row.get("cert_pem")?,
        cert_fingerprint: row.get("cert_fingerprint")?,
        attestation_json: row.get("attestation_json")?,
        attestation_mismatch: row.get::<_, i64>("attestation_mismatch")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const AGENT_COLUMNS: &str = "id, name, status, last_seen, os, agent_version, packs_json, \
    cert_pem, cert_fingerprint, attestation_json, attestation_mismatch, created_at, updated_at";

impl Store {
    pub fn create_agent(&self, new_agent: NewAgent) -> Result<Agent, StoreError> {
        let conn = self.conn.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso8601();
        conn.execute(
            "INSERT INTO agents (id, name, status, os, agent_version, packs_json, \
             attestation_mismatch, created_at, updated_at) \
             VALUES (?1, ?2, 'offline', ?3, ?4, '[]', 0, ?5, ?5)",
            params![id, new_agent.name, new_agent.os, new_agent.agent_version, now],
        )
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                StoreError::Conflict(format!("agent name '{}' already exists", new_agent.name))
            }
            other => StoreError::Sqlite(other),
        })?;
        drop(conn);
        self.get_agent_by_id(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("agent '{id}' vanished after insert")))
    }

    /// Upserts an agent by name: on conflict, rewrites the row's `id` and
    /// resets transport state to `offline`, preserving the "re-enrollment
    /// replaces identity" behaviour the source exhibits.
    pub fn upsert_agent_by_name(&self, new_agent: NewAgent) -> Result<Agent, StoreError> {
        let conn = self.conn.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso8601();
        conn.execute(
            "INSERT INTO agents (id, name, status, os, agent_version, packs_json, \
             attestation_mismatch, created_at, updated_at) \
             VALUES (?1, ?2, 'offline', ?3, ?4, '[]', 0, ?5, ?5) \
             ON CONFLICT(name) DO UPDATE SET \
                id = excluded.id, \
                status = 'offline', \
                os = excluded.os, \
                agent_version = excluded.agent_version, \
                updated_at = excluded.updated_at",
            params![id, new_agent.name, new_agent.os, new_agent.agent_version, now],
        )?;
        drop(conn);
        self.get_agent_by_name(&new_agent.name)?
            .ok_or_else(|| StoreError::NotFound(format!("agent '{}' vanished after upsert", new_agent.name)))
    }

    pub fn get_agent_by_id(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
            params![id],
            row_to_agent,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE name = ?1"),
            params![name],
            row_to_agent,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY name"))?;
        let rows = stmt.query_map([], row_to_agent)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    pub fn update_agent_status(&self, id: &str, status: AgentStatus, last_seen: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agents SET status = ?1, last_seen = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), last_seen, now_iso8601(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{id}' not found")));
        }
        Ok(())
    }

    pub fn set_agent_packs(&self, id: &str, packs: &[PackEntry]) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let packs_json = serde_json::to_string(packs)?;
        let changed = conn.execute(
            "UPDATE agents SET packs_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![packs_json, now_iso8601(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{id}' not found")));
        }
        Ok(())
    }

    pub fn set_agent_attestation(
        &self,
        id: &str,
        attestation_json: &str,
        mismatch: bool,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agents SET attestation_json = ?1, attestation_mismatch = ?2, updated_at = ?3 WHERE id = ?4",
            params![attestation_json, mismatch as i64, now_iso8601(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{id}' not found")));
        }
        Ok(())
    }

    pub fn set_agent_certificate(&self, id: &str, cert_pem: &str, fingerprint: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE agents SET cert_pem = ?1, cert_fingerprint = ?2, updated_at = ?3 WHERE id = ?4",
            params![cert_pem, fingerprint, now_iso8601(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent '{id}' not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_fetches_an_agent() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_agent(NewAgent {
                name: "edge-01".into(),
                os: Some("linux".into()),
                agent_version: Some("1.0.0".into()),
            })
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Offline);

        let fetched = store.get_agent_by_name("edge-01").unwrap().unwrap();
        assert_eq!(fetched.id, agent.id);
    }

    #[test]
    fn duplicate_name_via_create_is_a_conflict() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_agent(NewAgent { name: "edge-01".into(), ..Default::default() })
            .unwrap();
        let err = store
            .create_agent(NewAgent { name: "edge-01".into(), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn upsert_rewrites_id_on_re_enrollment() {
        let store = Store::open_in_memory().unwrap();
        let first = store
            .upsert_agent_by_name(NewAgent { name: "edge-01".into(), ..Default::default() })
            .unwrap();
        let second = store
            .upsert_agent_by_name(NewAgent { name: "edge-01".into(), ..Default::default() })
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.list_agents().unwrap().len(), 1);
    }

    #[test]
    fn updates_status_and_packs() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_agent(NewAgent { name: "edge-01".into(), ..Default::default() })
            .unwrap();
        store
            .update_agent_status(&agent.id, AgentStatus::Online, "2026-01-01T00:00:00.000Z")
            .unwrap();
        store
            .set_agent_packs(&agent.id, &[PackEntry { name: "net".into(), version: "1".into(), status: "ok".into() }])
            .unwrap();
        let fetched = store.get_agent_by_id(&agent.id).unwrap().unwrap();
        assert_eq!(fetched.status, AgentStatus::Online);
        assert_eq!(fetched.packs.len(), 1);
    }
}
