//! Critical paths and their ordered steps (spec.md §3 CriticalPath).

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sonde_core::{now_iso8601, EntityKind};

use crate::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalPath {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalPathStep {
    pub id: String,
    pub critical_path_id: String,
    pub position: i64,
    pub target_kind: EntityKind,
    pub target_id: String,
    pub probes: Vec<String>,
}

/// A step as supplied by a caller replacing a path's full step list, before
/// ids/positions are assigned.
#[derive(Debug, Clone)]
pub struct NewCriticalPathStep {
    pub target_kind: EntityKind,
    pub target_id: String,
    pub probes: Vec<String>,
}

fn row_to_path(row: &Row) -> rusqlite::Result<CriticalPath> {
    Ok(CriticalPath {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_step(row: &Row) -> rusqlite::Result<CriticalPathStep> {
    let target_kind_str: String = row.get("target_kind")?;
    let probes_json: String = row.get("probes_json")?;
    Ok(CriticalPathStep {
        id: row.get("id")?,
        critical_path_id: row.get("critical_path_id")?,
        position: row.get("position")?,
        target_kind: target_kind_str.parse().unwrap_or(EntityKind::Agent),
        target_id: row.get("target_id")?,
        probes: serde_json::from_str(&probes_json).unwrap_or_default(),
    })
}

impl Store {
    pub fn create_critical_path(&self, name: &str) -> Result<CriticalPath, StoreError> {
        let conn = self.conn.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso8601();
        conn.execute(
            "INSERT INTO critical_paths (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id, name, now],
        )?;
        Ok(CriticalPath { id, name: name.into(), created_at: now.clone(), updated_at: now })
    }

    pub fn get_critical_path(&self, id: &str) -> Result<Option<CriticalPath>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, created_at, updated_at FROM critical_paths WHERE id = ?1",
            params![id],
            row_to_path,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_critical_paths(&self) -> Result<Vec<CriticalPath>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, created_at, updated_at FROM critical_paths ORDER BY name")?;
        let rows = stmt.query_map([], row_to_path)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    pub fn get_critical_path_steps(&self, critical_path_id: &str) -> Result<Vec<CriticalPathStep>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, critical_path_id, position, target_kind, target_id, probes_json \
             FROM critical_path_steps WHERE critical_path_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![critical_path_id], row_to_step)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    /// Replaces a path's full ordered step list in one transaction (spec.md
    /// §4.A bulk-replace invariant).
    pub fn set_critical_path_steps(
        &self,
        critical_path_id: &str,
        steps: Vec<NewCriticalPathStep>,
    ) -> Result<Vec<CriticalPathStep>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM critical_path_steps WHERE critical_path_id = ?1",
            params![critical_path_id],
        )?;
        let mut inserted = Vec::with_capacity(steps.len());
        for (position, step) in steps.into_iter().enumerate() {
            let id = uuid::Uuid::new_v4().to_string();
            let probes_json = serde_json::to_string(&step.probes)?;
            tx.execute(
                "INSERT INTO critical_path_steps (id, critical_path_id, position, target_kind, target_id, probes_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, critical_path_id, position as i64, step.target_kind.as_str(), step.target_id, probes_json],
            )?;
            inserted.push(CriticalPathStep {
                id,
                critical_path_id: critical_path_id.to_string(),
                position: position as i64,
                target_kind: step.target_kind,
                target_id: step.target_id,
                probes: step.probes,
            });
        }
        tx.execute(
            "UPDATE critical_paths SET updated_at = ?1 WHERE id = ?2",
            params![now_iso8601(), critical_path_id],
        )?;
        tx.commit()?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_steps_atomically() {
        let store = Store::open_in_memory().unwrap();
        let path = store.create_critical_path("checkout-flow").unwrap();
        store
            .set_critical_path_steps(
                &path.id,
                vec![NewCriticalPathStep {
                    target_kind: EntityKind::Agent,
                    target_id: "edge-01".into(),
                    probes: vec!["ping".into()],
                }],
            )
            .unwrap();
        store
            .set_critical_path_steps(
                &path.id,
                vec![
                    NewCriticalPathStep { target_kind: EntityKind::Agent, target_id: "edge-01".into(), probes: vec!["ping".into()] },
                    NewCriticalPathStep { target_kind: EntityKind::Integration, target_id: "int-1".into(), probes: vec!["status".into()] },
                ],
            )
            .unwrap();
        let steps = store.get_critical_path_steps(&path.id).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].position, 0);
        assert_eq!(steps[1].position, 1);
    }
}
