//! Integration entity CRUD (spec.md §3 Integration).

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sonde_core::{now_iso8601, EntityKind, IntegrationStatus};

use crate::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    pub config_encrypted: String,
    pub status: IntegrationStatus,
    pub last_tested_at: Option<String>,
    pub last_test_result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub type_: String,
    pub name: String,
    pub config_encrypted: String,
}

const INTEGRATION_COLUMNS: &str =
    "id, type, name, config_encrypted, status, last_tested_at, last_test_result, created_at, updated_at";

fn row_to_integration(row: &Row) -> rusqlite::Result<Integration> {
    let status_str: String = row.get("status")?;
    Ok(Integration {
        id: row.get("id")?,
        type_: row.get("type")?,
        name: row.get("name")?,
        config_encrypted: row.get("config_encrypted")?,
        status: status_str.parse().unwrap_or(IntegrationStatus::Untested),
        last_tested_at: row.get("last_tested_at")?,
        last_test_result: row.get("last_test_result")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn create_integration(&self, new: NewIntegration) -> Result<Integration, StoreError> {
        let conn = self.conn.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso8601();
        conn.execute(
            "INSERT INTO integrations (id, type, name, config_encrypted, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'untested', ?5, ?5)",
            params![id, new.type_, new.name, new.config_encrypted, now],
        )
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                StoreError::Conflict(format!("integration name '{}' already exists", new.name))
            }
            other => StoreError::Sqlite(other),
        })?;
        drop(conn);
        self.get_integration_by_id(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("integration '{id}' vanished after insert")))
    }

    pub fn get_integration_by_id(&self, id: &str) -> Result<Option<Integration>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE id = ?1"),
            params![id],
            row_to_integration,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_integration_by_name(&self, name: &str) -> Result<Option<Integration>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE name = ?1"),
            params![name],
            row_to_integration,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_integrations(&self) -> Result<Vec<Integration>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {INTEGRATION_COLUMNS} FROM integrations ORDER BY name"))?;
        let rows = stmt.query_map([], row_to_integration)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    pub fn update_integration_config(&self, id: &str, config_encrypted: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE integrations SET config_encrypted = ?1, updated_at = ?2 WHERE id = ?3",
            params![config_encrypted, now_iso8601(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("integration '{id}' not found")));
        }
        Ok(())
    }

    pub fn update_integration_test_result(
        &self,
        id: &str,
        status: IntegrationStatus,
        result: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let now = now_iso8601();
        let changed = conn.execute(
            "UPDATE integrations SET status = ?1, last_test_result = ?2, last_tested_at = ?3, updated_at = ?3 \
             WHERE id = ?4",
            params![status.as_str(), result, now, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("integration '{id}' not found")));
        }
        Ok(())
    }

    /// Deletes an integration and cascades its tags (spec.md §8 scenario 6).
    pub fn delete_integration(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute("DELETE FROM integrations WHERE id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM tags WHERE entity_kind = ?1 AND entity_id = ?2",
            params![EntityKind::Integration.as_str(), id],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_deletes_with_tag_cascade() {
        let store = Store::open_in_memory().unwrap();
        let integration = store
            .create_integration(NewIntegration {
                type_: "http-probe".into(),
                name: "graph-prod".into(),
                config_encrypted: "cipher-text".into(),
            })
            .unwrap();
        store
            .set_entity_tags(EntityKind::Integration, &integration.id, &["monitoring".into()])
            .unwrap();
        assert!(store.delete_integration(&integration.id).unwrap());
        assert_eq!(
            store.get_entity_tags(EntityKind::Integration, &integration.id).unwrap(),
            Vec::<String>::new()
        );
        assert!(store.get_integration_by_id(&integration.id).unwrap().is_none());
    }

    #[test]
    fn duplicate_name_is_a_conflict() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_integration(NewIntegration { type_: "http-probe".into(), name: "dup".into(), config_encrypted: "x".into() })
            .unwrap();
        let err = store
            .create_integration(NewIntegration { type_: "http-probe".into(), name: "dup".into(), config_encrypted: "y".into() })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn records_test_connection_result() {
        let store = Store::open_in_memory().unwrap();
        let integration = store
            .create_integration(NewIntegration { type_: "http-probe".into(), name: "svc".into(), config_encrypted: "x".into() })
            .unwrap();
        store
            .update_integration_test_result(&integration.id, IntegrationStatus::Ok, "200 OK")
            .unwrap();
        let fetched = store.get_integration_by_id(&integration.id).unwrap().unwrap();
        assert_eq!(fetched.status, IntegrationStatus::Ok);
        assert_eq!(fetched.last_test_result.as_deref(), Some("200 OK"));
    }
}
