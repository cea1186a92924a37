//! Pending-request correlation table (spec.md §4.D, §9 "Dispatcher pending
//! map").
//!
//! Backed by a concurrent map keyed by a monotone id; a single periodic
//! sweep resolves expired entries rather than arming one timer per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::DispatchError;

pub(crate) struct PendingEntry {
    pub(crate) waiter: oneshot::Sender<Result<serde_json::Value, DispatchError>>,
    pub(crate) deadline: Instant,
    pub(crate) agent_name: String,
}

/// Monotone request-id allocator plus the correlation table itself.
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    entries: DashMap<u64, PendingEntry>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn insert(&self, id: u64, entry: PendingEntry) {
        self.entries.insert(id, entry);
    }

    /// Resolves and removes a pending entry by id, as happens when a
    /// matching `response` frame arrives.
    pub(crate) fn resolve(&self, id: u64, result: Result<serde_json::Value, DispatchError>) -> bool {
        if let Some((_, entry)) = self.entries.remove(&id) {
            let _ = entry.waiter.send(result);
            true
        } else {
            false
        }
    }

    /// Fails and removes every pending entry for `agent_name`, as happens
    /// on disconnect (spec.md §4.D).
    pub(crate) fn fail_all_for_agent(&self, agent_name: &str, error: DispatchError) {
        let ids: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.agent_name == agent_name)
            .map(|e| *e.key())
            .collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.waiter.send(Err(error.clone()));
            }
        }
    }

    /// Scans for and resolves entries whose deadline has passed, returning
    /// how many were resolved. Called from a single periodic sweep task.
    pub(crate) fn sweep_expired(&self, now: Instant) -> usize {
        let ids: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| *e.key())
            .collect();
        let count = ids.len();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.waiter.send(Err(DispatchError::Timeout));
            }
        }
        count
    }
}
