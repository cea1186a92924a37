//! Agent session state machine and registry (spec.md §4.D).

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;
use sonde_core::AgentStatus;
use tokio::sync::mpsc;

use crate::message::HubMessage;

/// `dialing -> authenticating -> registered -> active -> closing -> closed`
/// (spec.md §4.D). The hub only ever observes a session from
/// `registered` onward: the dialing/authenticating states belong to the
/// TLS handshake the hub binary performs before calling
/// [`crate::Dispatcher::register_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registered,
    Active,
    Closing,
    Closed,
}

/// One connected agent's transport handle. Cheap to clone; every clone
/// shares the same outbound channel and counters.
pub struct AgentSession {
    pub agent_name: String,
    outbound: mpsc::UnboundedSender<HubMessage>,
    state: RwLock<SessionState>,
    missed_heartbeats: AtomicU8,
}

impl AgentSession {
    pub(crate) fn new(agent_name: String, outbound: mpsc::UnboundedSender<HubMessage>) -> Self {
        Self {
            agent_name,
            outbound,
            state: RwLock::new(SessionState::Active),
            missed_heartbeats: AtomicU8::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Sends a frame to this agent over its outbound channel. Fails if the
    /// session's reader/writer task has already dropped the receiver
    /// (spec.md §4.D "network error during a call fails that call only").
    pub(crate) fn send(&self, message: HubMessage) -> Result<(), ()> {
        self.outbound.send(message).map_err(|_| ())
    }

    pub(crate) fn note_heartbeat_received(&self) {
        self.missed_heartbeats.store(0, Ordering::SeqCst);
    }

    /// Records one missed heartbeat tick, returning the new missed count
    /// (spec.md §4.D: one miss -> degraded, two consecutive misses -> offline).
    pub(crate) fn note_heartbeat_missed(&self) -> u8 {
        self.missed_heartbeats.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn derived_status(&self) -> AgentStatus {
        match self.missed_heartbeats.load(Ordering::SeqCst) {
            0 => AgentStatus::Online,
            1 => AgentStatus::Degraded,
            _ => AgentStatus::Offline,
        }
    }
}
