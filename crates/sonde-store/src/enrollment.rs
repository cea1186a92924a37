//! Enrollment token lifecycle (spec.md §4.H).

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sonde_core::now_iso8601;

use crate::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentToken {
    pub token: String,
    pub created_at: String,
    pub expires_at: String,
    pub used_at: Option<String>,
    pub used_by_agent: Option<String>,
}

/// Outcome of a [`Store::consume_enrollment_token`] attempt (spec.md §4.H:
/// losers see `already-used` or `expired`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    AlreadyUsed,
    Expired,
    NotFound,
}

fn row_to_token(row: &Row) -> rusqlite::Result<EnrollmentToken> {
    Ok(EnrollmentToken {
        token: row.get("token")?,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
        used_at: row.get("used_at")?,
        used_by_agent: row.get("used_by_agent")?,
    })
}

impl Store {
    pub fn create_enrollment_token(&self, token: &str, ttl_seconds: i64) -> Result<EnrollmentToken, StoreError> {
        let conn = self.conn.lock();
        let created_at = now_iso8601();
        let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(ttl_seconds))
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        conn.execute(
            "INSERT INTO enrollment_tokens (token, created_at, expires_at) VALUES (?1, ?2, ?3)",
            params![token, created_at, expires_at],
        )?;
        Ok(EnrollmentToken { token: token.into(), created_at, expires_at, used_at: None, used_by_agent: None })
    }

    /// Pure read: a token is valid if it exists, is unused, and has not
    /// expired (spec.md §4.H).
    pub fn is_enrollment_token_valid(&self, token: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let row: Option<EnrollmentToken> = conn
            .query_row(
                "SELECT token, created_at, expires_at, used_at, used_by_agent FROM enrollment_tokens WHERE token = ?1",
                params![token],
                row_to_token,
            )
            .optional()?;
        let Some(row) = row else { return Ok(false) };
        if row.used_at.is_some() {
            return Ok(false);
        }
        let now = now_iso8601();
        Ok(now < row.expires_at)
    }

    /// Atomic compare-and-set: re-reads the row inside the write
    /// transaction, checks `usedAt is null && now < expiresAt`, then sets
    /// `usedAt`/`usedByAgent`. Exactly one concurrent caller observes
    /// [`ConsumeOutcome::Consumed`] (spec.md §8 quantified invariant),
    /// because SQLite serialises writers through the store's single
    /// connection mutex.
    pub fn consume_enrollment_token(&self, token: &str, agent_name: &str) -> Result<ConsumeOutcome, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let row: Option<EnrollmentToken> = tx
            .query_row(
                "SELECT token, created_at, expires_at, used_at, used_by_agent FROM enrollment_tokens WHERE token = ?1",
                params![token],
                row_to_token,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if row.used_at.is_some() {
            return Ok(ConsumeOutcome::AlreadyUsed);
        }
        let now = now_iso8601();
        if now >= row.expires_at {
            return Ok(ConsumeOutcome::Expired);
        }
        tx.execute(
            "UPDATE enrollment_tokens SET used_at = ?1, used_by_agent = ?2 WHERE token = ?3",
            params![now, agent_name, token],
        )?;
        tx.commit()?;
        Ok(ConsumeOutcome::Consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_valid_and_consumable() {
        let store = Store::open_in_memory().unwrap();
        store.create_enrollment_token("tok-1", 900).unwrap();
        assert!(store.is_enrollment_token_valid("tok-1").unwrap());
        assert_eq!(
            store.consume_enrollment_token("tok-1", "edge-01").unwrap(),
            ConsumeOutcome::Consumed
        );
    }

    #[test]
    fn second_consume_is_already_used() {
        let store = Store::open_in_memory().unwrap();
        store.create_enrollment_token("tok-1", 900).unwrap();
        store.consume_enrollment_token("tok-1", "edge-01").unwrap();
        assert_eq!(
            store.consume_enrollment_token("tok-1", "edge-02").unwrap(),
            ConsumeOutcome::AlreadyUsed
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.create_enrollment_token("tok-1", -1).unwrap();
        assert!(!store.is_enrollment_token_valid("tok-1").unwrap());
        assert_eq!(
            store.consume_enrollment_token("tok-1", "edge-01").unwrap(),
            ConsumeOutcome::Expired
        );
    }

    #[test]
    fn unknown_token_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(
            store.consume_enrollment_token("missing", "edge-01").unwrap(),
            ConsumeOutcome::NotFound
        );
    }

    /// spec.md §8: "For any consumeEnrollmentToken(t,·) called concurrently
    /// n times, exactly one call returns valid:true." Real OS threads
    /// racing on the same token, not just sequential calls.
    #[test]
    fn concurrent_consumers_agree_on_exactly_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let store = Store::open_in_memory().unwrap();
        store.create_enrollment_token("tok-race", 900).unwrap();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.consume_enrollment_token("tok-race", &format!("edge-{i}")).unwrap())
            })
            .collect();

        let outcomes: Vec<ConsumeOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = outcomes.iter().filter(|o| **o == ConsumeOutcome::Consumed).count();
        assert_eq!(wins, 1);
        assert_eq!(outcomes.iter().filter(|o| **o == ConsumeOutcome::AlreadyUsed).count(), 15);
    }
}
