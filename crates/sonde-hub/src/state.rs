//! Shared handles wired once at startup and cloned into every request
//! handler (spec.md §12).

use std::sync::Arc;
use std::time::Instant;

use sonde_dispatcher::Dispatcher;
use sonde_enrollment::EnrollmentService;
use sonde_observability::MetricsExporter;
use sonde_router::ProbeRouter;
use sonde_runbook::RunbookEngine;
use sonde_store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub dispatcher: Dispatcher,
    pub router: Arc<ProbeRouter>,
    pub runbook: Arc<RunbookEngine>,
    pub enrollment: Arc<EnrollmentService>,
    pub metrics: MetricsExporter,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
