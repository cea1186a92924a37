//! Freeform key/value settings (spec.md §3 `HubSetting`: "opaque key/value
//! with `updated_at`").

use rusqlite::{params, OptionalExtension};
use sonde_core::now_iso8601;

use crate::{Store, StoreError};

/// A full `hub_settings` row, for callers that need the `updated_at`
/// stamp rather than just the value.
#[derive(Debug, Clone)]
pub struct HubSetting {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

impl Store {
    pub fn get_hub_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM hub_settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(StoreError::from)
    }

    pub fn get_hub_setting_row(&self, key: &str) -> Result<Option<HubSetting>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT key, value, updated_at FROM hub_settings WHERE key = ?1",
            params![key],
            |row| Ok(HubSetting { key: row.get(0)?, value: row.get(1)?, updated_at: row.get(2)? }),
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn set_hub_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hub_settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_iso8601()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_overwrites() {
        let store = Store::open_in_memory().unwrap();
        store.set_hub_setting("theme", "dark").unwrap();
        store.set_hub_setting("theme", "light").unwrap();
        assert_eq!(store.get_hub_setting("theme").unwrap().as_deref(), Some("light"));
        assert!(store.get_hub_setting("missing").unwrap().is_none());
    }

    #[test]
    fn set_stamps_updated_at_and_overwrite_bumps_it() {
        let store = Store::open_in_memory().unwrap();
        store.set_hub_setting("theme", "dark").unwrap();
        let first = store.get_hub_setting_row("theme").unwrap().unwrap();
        assert!(!first.updated_at.is_empty());

        store.set_hub_setting("theme", "light").unwrap();
        let second = store.get_hub_setting_row("theme").unwrap().unwrap();
        assert_eq!(second.value, "light");
        assert!(second.updated_at >= first.updated_at);
    }
}
