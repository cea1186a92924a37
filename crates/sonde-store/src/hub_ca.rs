//! Singleton CA row (spec.md §3 HubCa). The key is decrypted lazily by
//! `sonde-crypto`; this module only ever handles PEM/ciphertext strings.

use rusqlite::{params, OptionalExtension};
use sonde_core::now_iso8601;

use crate::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct HubCa {
    pub cert_pem: String,
    pub key_pem: Option<String>,
    pub key_pem_enc: Option<String>,
    pub created_at: String,
}

impl Store {
    pub fn get_hub_ca(&self) -> Result<Option<HubCa>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT cert_pem, key_pem, key_pem_enc, created_at FROM hub_ca WHERE id = 1",
            [],
            |row| {
                Ok(HubCa {
                    cert_pem: row.get(0)?,
                    key_pem: row.get(1)?,
                    key_pem_enc: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Persists the singleton CA row, storing the encrypted form and
    /// leaving `key_pem` (legacy plaintext) empty for anything created
    /// through this port.
    pub fn save_hub_ca(&self, cert_pem: &str, key_pem_enc: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hub_ca (id, cert_pem, key_pem, key_pem_enc, created_at) \
             VALUES (1, ?1, NULL, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET cert_pem = excluded.cert_pem, key_pem_enc = excluded.key_pem_enc",
            params![cert_pem, key_pem_enc, now_iso8601()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_ca_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_hub_ca().unwrap().is_none());
    }

    #[test]
    fn saves_and_overwrites_the_singleton_row() {
        let store = Store::open_in_memory().unwrap();
        store.save_hub_ca("cert-v1", "enc-v1").unwrap();
        store.save_hub_ca("cert-v2", "enc-v2").unwrap();
        let ca = store.get_hub_ca().unwrap().unwrap();
        assert_eq!(ca.cert_pem, "cert-v2");
        assert_eq!(ca.key_pem_enc.as_deref(), Some("enc-v2"));
    }
}
