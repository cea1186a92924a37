//! API key CRUD (spec.md §3 ApiKey). Raw keys are never stored, only a
//! caller-supplied fingerprint hash.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sonde_core::now_iso8601;

use crate::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyType {
    Mcp,
    Agent,
}

impl ApiKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyType::Mcp => "mcp",
            ApiKeyType::Agent => "agent",
        }
    }
}

impl std::str::FromStr for ApiKeyType {
    type Err = StoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcp" => Ok(ApiKeyType::Mcp),
            "agent" => Ok(ApiKeyType::Agent),
            other => Err(StoreError::Conflict(format!("unknown api key type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub key_hash: String,
    pub policy_json: String,
    pub role_id: Option<String>,
    pub key_type: ApiKeyType,
    pub owner_id: Option<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub last_used_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub name: String,
    pub key_hash: String,
    pub policy_json: String,
    pub role_id: Option<String>,
    pub key_type: ApiKeyType,
    pub owner_id: Option<String>,
    pub expires_at: Option<String>,
}

const API_KEY_COLUMNS: &str =
    "id, name, key_hash, policy_json, role_id, key_type, owner_id, created_at, expires_at, revoked_at, last_used_at";

fn row_to_api_key(row: &Row) -> rusqlite::Result<ApiKey> {
    let key_type_str: String = row.get("key_type")?;
    Ok(ApiKey {
        id: row.get("id")?,
        name: row.get("name")?,
        key_hash: row.get("key_hash")?,
        policy_json: row.get("policy_json")?,
        role_id: row.get("role_id")?,
        key_type: key_type_str.parse().unwrap_or(ApiKeyType::Agent),
        owner_id: row.get("owner_id")?,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
        revoked_at: row.get("revoked_at")?,
        last_used_at: row.get("last_used_at")?,
    })
}

impl Store {
    pub fn create_api_key(&self, new: NewApiKey) -> Result<ApiKey, StoreError> {
        let conn = self.conn.lock();
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_iso8601();
        conn.execute(
            "INSERT INTO api_keys (id, name, key_hash, policy_json, role_id, key_type, owner_id, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![id, new.name, new.key_hash, new.policy_json, new.role_id, new.key_type.as_str(), new.owner_id, now, new.expires_at],
        )
        .map_err(|err| match err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                StoreError::Conflict("api key hash already registered".into())
            }
            other => StoreError::Sqlite(other),
        })?;
        drop(conn);
        self.get_api_key_by_id(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("api key '{id}' vanished after insert")))
    }

    pub fn get_api_key_by_id(&self, id: &str) -> Result<Option<ApiKey>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
            params![id],
            row_to_api_key,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = ?1"),
            params![key_hash],
            row_to_api_key,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_api_keys(&self) -> Result<Vec<ApiKey>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY created_at"))?;
        let rows = stmt.query_map([], row_to_api_key)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::from)
    }

    pub fn revoke_api_key(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
            params![now_iso8601(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("api key '{id}' not found or already revoked")));
        }
        Ok(())
    }

    pub fn touch_api_key_last_used(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2", params![now_iso8601(), id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewApiKey {
        NewApiKey {
            name: "ci-runner".into(),
            key_hash: "hash-123".into(),
            policy_json: "{}".into(),
            role_id: None,
            key_type: ApiKeyType::Mcp,
            owner_id: None,
            expires_at: None,
        }
    }

    #[test]
    fn creates_and_looks_up_by_hash() {
        let store = Store::open_in_memory().unwrap();
        let key = store.create_api_key(sample()).unwrap();
        let found = store.get_api_key_by_hash("hash-123").unwrap().unwrap();
        assert_eq!(found.id, key.id);
    }

    #[test]
    fn revoke_is_idempotent_and_errors_on_second_call() {
        let store = Store::open_in_memory().unwrap();
        let key = store.create_api_key(sample()).unwrap();
        store.revoke_api_key(&key.id).unwrap();
        assert!(store.revoke_api_key(&key.id).is_err());
    }
}
