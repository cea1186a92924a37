//! Full-duplex signed agent transport (spec.md §4.D, §5, §6).
//!
//! [`Dispatcher`] owns the session registry and the pending-request
//! correlation table. It does not own a WebSocket listener itself: the
//! `sonde-hub` binary terminates TLS and the WebSocket upgrade, validates
//! the agent's client certificate, and then calls
//! [`Dispatcher::register_session`] with the agent's name and a channel
//! pair, forwarding whatever [`HubMessage`] frames arrive on the wire into
//! [`Dispatcher::handle_inbound`].

pub mod message;
mod pending;
mod session;

pub use message::{HubMessage, MessageKind};
pub use session::SessionState;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{json, Value};
use sonde_core::{now_iso8601, AgentStatus};
use sonde_crypto::MessageSigner;
use sonde_store::{Store, StoreError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use pending::{PendingEntry, PendingRequests};
use session::AgentSession;

/// Heartbeat cadence in both directions (spec.md §4.D, §6).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How often the single pending-request sweep task scans for timeouts
/// (spec.md §9: one timer, not one per call).
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    #[error("agent offline")]
    AgentOffline,
    #[error("timeout")]
    Timeout,
    #[error("disconnected")]
    Disconnected,
    #[error("agent returned an error: {0}")]
    Remote(String),
    #[error("malformed response")]
    MalformedResponse,
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        DispatchError::Store(err.to_string())
    }
}

impl From<DispatchError> for sonde_core::HubError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::AgentOffline | DispatchError::Disconnected => {
                sonde_core::HubError::Unreachable(err.to_string())
            }
            DispatchError::Timeout => sonde_core::HubError::Timeout(err.to_string()),
            other => sonde_core::HubError::Internal(other.to_string()),
        }
    }
}

/// Broadcast to observers on every agent status transition (spec.md §4.D
/// "observer registration for status changes").
#[derive(Debug, Clone)]
pub struct AgentStatusChange {
    pub agent_name: String,
    pub status: AgentStatus,
}

/// The agent transport and dispatcher: session registry, signed framing,
/// request correlation, heartbeats (spec.md §4.D).
#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<DashMap<String, Arc<AgentSession>>>,
    pending: Arc<PendingRequests>,
    signer: Arc<MessageSigner>,
    store: Store,
    status_tx: broadcast::Sender<AgentStatusChange>,
}

impl Dispatcher {
    pub fn new(store: Store, signer: MessageSigner) -> Self {
        let (status_tx, _) = broadcast::channel(256);
        Self {
            sessions: Arc::new(DashMap::new()),
            pending: Arc::new(PendingRequests::new()),
            signer: Arc::new(signer),
            store,
            status_tx,
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<AgentStatusChange> {
        self.status_tx.subscribe()
    }

    /// Registers a newly authenticated session (spec.md §4.D: a session
    /// reaches `registered`/`active` only once the client certificate and
    /// enrollment identity have been verified upstream, by the hub
    /// binary's TLS layer). Returns the receiving half of the outbound
    /// channel; the caller is responsible for writing those frames to the
    /// actual WebSocket.
    pub fn register_session(&self, agent_name: &str) -> mpsc::UnboundedReceiver<HubMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(AgentSession::new(agent_name.to_string(), tx));
        self.sessions.insert(agent_name.to_string(), session);

        if let Err(err) = self.store.update_agent_status(
            &self.agent_id_or_name(agent_name),
            AgentStatus::Online,
            &now_iso8601(),
        ) {
            warn!(agent = agent_name, ?err, "failed to persist online status at session registration");
        }
        info!(agent = agent_name, "agent session registered");
        let _ = self.status_tx.send(AgentStatusChange {
            agent_name: agent_name.to_string(),
            status: AgentStatus::Online,
        });
        rx
    }

    /// Resolves the store id for an agent by name, falling back to the
    /// name itself if the row is somehow absent (defensive: the dispatcher
    /// never fails a disconnect/registration over a missing row).
    fn agent_id_or_name(&self, agent_name: &str) -> String {
        match self.store.get_agent_by_name(agent_name) {
            Ok(Some(agent)) => agent.id,
            _ => agent_name.to_string(),
        }
    }

    /// Begins a graceful shutdown of a session: `active -> closing`. The
    /// session stays in the registry (so a racing `call` still finds it
    /// and fails fast against a closed channel) until the transport task
    /// actually drops it and calls [`Dispatcher::on_disconnect`].
    pub fn begin_close(&self, agent_name: &str) {
        if let Some(session) = self.sessions.get(agent_name) {
            session.set_state(SessionState::Closing);
        }
    }

    /// Tears down a session: removes it from the registry, marks the agent
    /// offline, and fails every pending request for it with
    /// `disconnected` (spec.md §4.D).
    pub fn on_disconnect(&self, agent_name: &str) {
        if let Some((_, session)) = self.sessions.remove(agent_name) {
            session.set_state(SessionState::Closed);
        }
        self.pending.fail_all_for_agent(agent_name, DispatchError::Disconnected);
        if let Err(err) =
            self.store.update_agent_status(&self.agent_id_or_name(agent_name), AgentStatus::Offline, &now_iso8601())
        {
            warn!(agent = agent_name, ?err, "failed to persist offline status on disconnect");
        }
        info!(agent = agent_name, "agent session closed");
        let _ = self.status_tx.send(AgentStatusChange {
            agent_name: agent_name.to_string(),
            status: AgentStatus::Offline,
        });
    }

    pub fn is_online(&self, agent_name: &str) -> bool {
        self.sessions
            .get(agent_name)
            .map(|s| s.state() == SessionState::Active)
            .unwrap_or(false)
    }

    pub fn list_online_agents(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Issues an RPC to `agent_name` and awaits its response or timeout
    /// (spec.md §4.D `call`). Returns `agent offline` immediately if the
    /// session is absent, without ever touching the pending table.
    pub async fn call(
        &self,
        agent_name: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, DispatchError> {
        let session = self
            .sessions
            .get(agent_name)
            .map(|s| s.clone())
            .ok_or(DispatchError::AgentOffline)?;

        let id = self.pending.next_id();
        let body = json!({ "method": method, "params": params });
        let message = HubMessage::signed(id.to_string(), MessageKind::Request, body, &self.signer)
            .map_err(|e| DispatchError::Store(e.to_string()))?;

        let (waiter, receiver) = oneshot::channel();
        self.pending.insert(
            id,
            PendingEntry {
                waiter,
                deadline: Instant::now() + timeout,
                agent_name: agent_name.to_string(),
            },
        );

        if session.send(message).is_err() {
            self.pending.resolve(id, Err(DispatchError::Disconnected));
            return Err(DispatchError::Disconnected);
        }

        receiver.await.unwrap_or(Err(DispatchError::Disconnected))
    }

    /// Sends an unsolicited, hub-originated event to every active session
    /// (spec.md §4.D `broadcast`).
    pub fn broadcast(&self, event: Value) {
        let body = json!({ "type": "broadcast", "payload": event });
        for entry in self.sessions.iter() {
            let Ok(message) = HubMessage::signed("0".into(), MessageKind::Event, body.clone(), &self.signer) else {
                continue;
            };
            let _ = entry.value().send(message);
        }
    }

    /// Routes an inbound frame from `agent_name` to the correlation table,
    /// attestation handling, or heartbeat bookkeeping (spec.md §4.D, §6).
    /// Hub-originated signatures are verified agent-side per spec.md §6;
    /// inbound frames are trusted by virtue of the mTLS session identity
    /// established before `register_session` was called, so this never
    /// rejects a frame for a missing/invalid `sig`.
    pub fn handle_inbound(&self, agent_name: &str, message: HubMessage) {
        match message.kind {
            MessageKind::Response => {
                let Ok(id) = message.id.parse::<u64>() else {
                    warn!(agent = agent_name, id = %message.id, "response with malformed id");
                    return;
                };
                let result = parse_response_body(&message.body);
                self.pending.resolve(id, result);
            }
            MessageKind::Event => {
                self.handle_event(agent_name, &message.body);
            }
            MessageKind::Heartbeat => {
                if let Some(session) = self.sessions.get(agent_name) {
                    session.note_heartbeat_received();
                }
            }
            MessageKind::Request => {
                warn!(agent = agent_name, "agent sent a request frame, which is not part of the protocol; dropping");
            }
        }
    }

    fn handle_event(&self, agent_name: &str, body: &Value) {
        let Some(event_type) = body.get("type").and_then(Value::as_str) else {
            return;
        };
        let Some(agent) = self.store.get_agent_by_name(agent_name).ok().flatten() else {
            return;
        };
        match event_type {
            "attestation" => {
                let payload = body.get("payload").cloned().unwrap_or(Value::Null);
                let expected_version = self.store.get_hub_setting("latest_agent_version").ok().flatten();
                let mismatch = expected_version
                    .as_deref()
                    .zip(agent.agent_version.as_deref())
                    .map(|(expected, actual)| expected != actual)
                    .unwrap_or(false);
                let payload_json = serde_json::to_string(&payload).unwrap_or_default();
                if let Err(err) = self.store.set_agent_attestation(&agent.id, &payload_json, mismatch) {
                    warn!(agent = agent_name, ?err, "failed to persist attestation event");
                }
            }
            "packs" => {
                if let Ok(packs) = serde_json::from_value(body.get("payload").cloned().unwrap_or(Value::Null)) {
                    if let Err(err) = self.store.set_agent_packs(&agent.id, &packs) {
                        warn!(agent = agent_name, ?err, "failed to persist pack inventory event");
                    }
                }
            }
            other => {
                info!(agent = agent_name, event = other, "unhandled agent event type");
            }
        }
    }

    /// Spawns the single pending-request timeout sweep (spec.md §9).
    pub fn spawn_timeout_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let pending = self.pending.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                pending.sweep_expired(Instant::now());
            }
        })
    }

    /// Spawns the heartbeat sender/monitor: emits a heartbeat to every
    /// active session every 30s and tracks misses, degrading then
    /// offlining a session that stops responding (spec.md §4.D).
    pub fn spawn_heartbeat_monitor(&self) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                dispatcher.heartbeat_tick();
            }
        })
    }

    fn heartbeat_tick(&self) {
        let names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let Some(session) = self.sessions.get(&name).map(|s| s.clone()) else { continue };
            let body = json!({ "ts": now_iso8601() });
            if let Ok(message) = HubMessage::signed("0".into(), MessageKind::Heartbeat, body, &self.signer) {
                let _ = session.send(message);
            }
            let missed = session.note_heartbeat_missed();
            let status = session.derived_status();
            if missed >= 2 {
                self.on_disconnect(&name);
                continue;
            }
            if let Err(err) = self.store.update_agent_status(&self.agent_id_or_name(&name), status, &now_iso8601()) {
                warn!(agent = %name, ?err, "failed to persist degraded status");
            }
            if status == AgentStatus::Degraded {
                let _ = self.status_tx.send(AgentStatusChange { agent_name: name, status });
            }
        }
    }
}

fn parse_response_body(body: &Value) -> Result<Value, DispatchError> {
    let ok = body.get("ok").and_then(Value::as_bool).ok_or(DispatchError::MalformedResponse)?;
    if ok {
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    } else {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown remote error")
            .to_string();
        Err(DispatchError::Remote(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonde_store::agent::NewAgent;

    fn dispatcher_with_agent(name: &str) -> Dispatcher {
        let store = Store::open_in_memory().unwrap();
        store.create_agent(NewAgent { name: name.into(), ..Default::default() }).unwrap();
        Dispatcher::new(store, MessageSigner::generate())
    }

    #[test]
    fn calling_an_unregistered_agent_fails_immediately() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let result = futures::executor::block_on(dispatcher.call(
            "edge-01",
            "ping",
            json!({}),
            Duration::from_millis(50),
        ));
        assert!(matches!(result, Err(DispatchError::AgentOffline)));
    }

    #[tokio::test]
    async fn registered_session_marks_agent_online_and_listed() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let _rx = dispatcher.register_session("edge-01");
        assert!(dispatcher.is_online("edge-01"));
        assert_eq!(dispatcher.list_online_agents(), vec!["edge-01".to_string()]);
    }

    #[tokio::test]
    async fn a_call_resolves_once_a_matching_response_arrives() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let mut rx = dispatcher.register_session("edge-01");
        let dispatcher2 = dispatcher.clone();

        let call = tokio::spawn(async move {
            dispatcher2.call("edge-01", "ping", json!({}), Duration::from_secs(5)).await
        });

        let outbound = rx.recv().await.expect("request frame sent");
        assert_eq!(outbound.kind, MessageKind::Request);
        dispatcher.handle_inbound(
            "edge-01",
            HubMessage {
                id: outbound.id,
                kind: MessageKind::Response,
                body: json!({"ok": true, "data": {"pong": true}}),
                sig: String::new(),
            },
        );

        let result = call.await.unwrap();
        assert_eq!(result.unwrap(), json!({"pong": true}));
    }

    #[tokio::test]
    async fn an_error_response_surfaces_as_remote_error() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let mut rx = dispatcher.register_session("edge-01");
        let dispatcher2 = dispatcher.clone();

        let call = tokio::spawn(async move {
            dispatcher2.call("edge-01", "ping", json!({}), Duration::from_secs(5)).await
        });
        let outbound = rx.recv().await.unwrap();
        dispatcher.handle_inbound(
            "edge-01",
            HubMessage {
                id: outbound.id,
                kind: MessageKind::Response,
                body: json!({"ok": false, "error": "boom"}),
                sig: String::new(),
            },
        );
        let result = call.await.unwrap();
        assert!(matches!(result, Err(DispatchError::Remote(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn a_call_without_a_response_times_out() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let _rx = dispatcher.register_session("edge-01");
        dispatcher.spawn_timeout_sweeper();
        let result = dispatcher.call("edge-01", "ping", json!({}), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(DispatchError::Timeout)));
    }

    #[tokio::test]
    async fn disconnect_fails_pending_calls_and_marks_offline() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let _rx = dispatcher.register_session("edge-01");
        let dispatcher2 = dispatcher.clone();
        let call = tokio::spawn(async move {
            dispatcher2.call("edge-01", "ping", json!({}), Duration::from_secs(5)).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.on_disconnect("edge-01");
        let result = call.await.unwrap();
        assert!(matches!(result, Err(DispatchError::Disconnected)));
        assert!(!dispatcher.is_online("edge-01"));
    }

    #[tokio::test]
    async fn two_missed_heartbeats_offline_the_session() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let _rx = dispatcher.register_session("edge-01");
        dispatcher.heartbeat_tick();
        assert!(dispatcher.is_online("edge-01"));
        dispatcher.heartbeat_tick();
        assert!(!dispatcher.is_online("edge-01"));
    }

    #[tokio::test]
    async fn a_heartbeat_response_resets_the_missed_counter() {
        let dispatcher = dispatcher_with_agent("edge-01");
        let _rx = dispatcher.register_session("edge-01");
        dispatcher.heartbeat_tick();
        dispatcher.handle_inbound(
            "edge-01",
            HubMessage { id: "0".into(), kind: MessageKind::Heartbeat, body: json!({}), sig: String::new() },
        );
        dispatcher.heartbeat_tick();
        assert!(dispatcher.is_online("edge-01"));
    }
}
