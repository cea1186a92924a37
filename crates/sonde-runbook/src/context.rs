//! The seam a runbook handler sees: run a probe, list connected agents
//! (spec.md §4.G).

use futures::future::BoxFuture;
use serde_json::Value;
use sonde_dispatcher::Dispatcher;
use sonde_router::{ProbeResponse, ProbeRouter};
use std::sync::Arc;

pub trait RunbookContext: Send + Sync {
    fn run_probe<'a>(&'a self, probe: &'a str, params: Value, agent: Option<&'a str>) -> BoxFuture<'a, ProbeResponse>;
    fn connected_agents(&self) -> Vec<String>;
}

/// The production context: every `run_probe` call goes through the real
/// router, so a runbook observes exactly the same routing, recording, and
/// audit behaviour a direct caller would.
pub struct RouterContext {
    router: Arc<ProbeRouter>,
    dispatcher: Dispatcher,
}

impl RouterContext {
    pub fn new(router: Arc<ProbeRouter>, dispatcher: Dispatcher) -> Self {
        Self { router, dispatcher }
    }
}

impl RunbookContext for RouterContext {
    fn run_probe<'a>(&'a self, probe: &'a str, params: Value, agent: Option<&'a str>) -> BoxFuture<'a, ProbeResponse> {
        Box::pin(async move { self.router.execute(probe, params, agent).await })
    }

    fn connected_agents(&self) -> Vec<String> {
        self.dispatcher.list_online_agents()
    }
}
