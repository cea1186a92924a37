//! Embedded SQLite store for Sonde Hub (spec.md §3, §4.A).
//!
//! Single writer: every access goes through one
//! `parking_lot::Mutex<rusqlite::Connection>`, guarded for short critical
//! sections. WAL journal mode and foreign keys are turned on at open time.

pub mod agent;
pub mod api_key;
pub mod audit;
pub mod critical_path;
pub mod enrollment;
mod error;
pub mod hub_ca;
pub mod hub_setting;
pub mod integration;
mod migrations;
pub mod probe_result;
pub mod tag;

pub use error::StoreError;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

/// Handle to the embedded store. Cheaply cloneable; every clone shares the
/// same underlying connection and mutex.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if absent) the database at `path`, enables WAL mode
    /// and foreign keys, and applies any migration not yet recorded in
    /// `schema_version`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database, used by tests and by any caller that
    /// wants a disposable store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        )?;
        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })?;

        let tx = conn.transaction()?;
        for (idx, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= current {
                continue;
            }
            tx.execute_batch(migration)?;
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tracing::info!(version, "applied store migration");
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_applies_every_migration() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, migrations::MIGRATIONS.len());
    }

    #[test]
    fn reopening_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        // Re-running migrate() against the already-migrated connection must
        // not error or double-apply anything.
        store.migrate().unwrap();
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn.lock();
        let fk_on: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0)).unwrap();
        assert_eq!(fk_on, 1);
    }
}
