//! Tag CRUD shared by agents and integrations (spec.md §3 Tag, §8
//! invariants on `setTags`/`add`/`removeTags`).

use std::collections::BTreeSet;

use rusqlite::params;
use sonde_core::EntityKind;

use crate::{Store, StoreError};

impl Store {
    /// Replaces an entity's entire tag set in one transaction, so no reader
    /// ever observes a partial replace (spec.md §4.A).
    pub fn set_entity_tags(&self, kind: EntityKind, entity_id: &str, tags: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM tags WHERE entity_kind = ?1 AND entity_id = ?2",
            params![kind.as_str(), entity_id],
        )?;
        let unique: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
        for tag in unique {
            tx.execute(
                "INSERT INTO tags (entity_kind, entity_id, tag) VALUES (?1, ?2, ?3)",
                params![kind.as_str(), entity_id, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Adds tags, deduplicating against the existing set (idempotent
    /// duplicate adds, spec.md §8).
    pub fn add_entity_tags(&self, kind: EntityKind, entity_id: &str, tags: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for tag in tags {
            tx.execute(
                "INSERT OR IGNORE INTO tags (entity_kind, entity_id, tag) VALUES (?1, ?2, ?3)",
                params![kind.as_str(), entity_id, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes tags; removing an absent tag is a no-op (spec.md §8).
    pub fn remove_entity_tags(&self, kind: EntityKind, entity_id: &str, tags: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for tag in tags {
            tx.execute(
                "DELETE FROM tags WHERE entity_kind = ?1 AND entity_id = ?2 AND tag = ?3",
                params![kind.as_str(), entity_id, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns an entity's tags sorted and deduplicated (spec.md §8:
    /// `getTags` after `setTags(S)` returns `sort(unique(S))`).
    pub fn get_entity_tags(&self, kind: EntityKind, entity_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT tag FROM tags WHERE entity_kind = ?1 AND entity_id = ?2 ORDER BY tag",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), entity_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>().map_err(StoreError::from)
    }

    /// Renames a tag across every entity it's attached to. Merge-safe: if
    /// the target name already exists on an entity, the rename collapses
    /// into it rather than violating the primary key (spec.md §8).
    pub fn rename_tag(&self, old: &str, new: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO tags (entity_kind, entity_id, tag) \
             SELECT entity_kind, entity_id, ?2 FROM tags WHERE tag = ?1",
            params![old, new],
        )?;
        tx.execute("DELETE FROM tags WHERE tag = ?1", params![old])?;
        tx.commit()?;
        Ok(())
    }

    /// Removes every tag row for an entity, used when the entity itself is
    /// deleted (spec.md §8 scenario 6, integration cascade).
    pub fn clear_entity_tags(&self, kind: EntityKind, entity_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM tags WHERE entity_kind = ?1 AND entity_id = ?2",
            params![kind.as_str(), entity_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_tags_then_get_is_sorted_and_unique() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_entity_tags(
                EntityKind::Agent,
                "a1",
                &["database".into(), "care".into(), "database".into(), "prod".into()],
            )
            .unwrap();
        assert_eq!(
            store.get_entity_tags(EntityKind::Agent, "a1").unwrap(),
            vec!["care", "database", "prod"]
        );
    }

    #[test]
    fn replace_is_not_additive() {
        let store = Store::open_in_memory().unwrap();
        store.set_entity_tags(EntityKind::Agent, "a1", &["care".into()]).unwrap();
        store.set_entity_tags(EntityKind::Agent, "a1", &["new".into()]).unwrap();
        assert_eq!(store.get_entity_tags(EntityKind::Agent, "a1").unwrap(), vec!["new"]);
    }

    #[test]
    fn add_tags_dedup_against_existing() {
        let store = Store::open_in_memory().unwrap();
        store.set_entity_tags(EntityKind::Agent, "a1", &["existing".into()]).unwrap();
        store
            .add_entity_tags(EntityKind::Agent, "a1", &["existing".into(), "new".into()])
            .unwrap();
        assert_eq!(
            store.get_entity_tags(EntityKind::Agent, "a1").unwrap(),
            vec!["existing", "new"]
        );
    }

    #[test]
    fn removing_an_absent_tag_is_a_no_op() {
        let store = Store::open_in_memory().unwrap();
        store.set_entity_tags(EntityKind::Agent, "a1", &["care".into()]).unwrap();
        store.remove_entity_tags(EntityKind::Agent, "a1", &["absent".into()]).unwrap();
        assert_eq!(store.get_entity_tags(EntityKind::Agent, "a1").unwrap(), vec!["care"]);
    }

    #[test]
    fn rename_merges_into_an_existing_destination_tag() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_entity_tags(EntityKind::Agent, "a1", &["old".into(), "new".into()])
            .unwrap();
        store.rename_tag("old", "new").unwrap();
        assert_eq!(store.get_entity_tags(EntityKind::Agent, "a1").unwrap(), vec!["new"]);
    }
}
