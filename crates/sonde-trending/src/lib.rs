//! 24h rolling probe-result trending store and aggregate queries
//! (spec.md §3 ProbeResult, §4.I).

use std::time::Duration as StdDuration;

use chrono::{Duration, SecondsFormat, Utc};
use sonde_core::ProbeStatus;
use sonde_store::probe_result::{NewProbeResult, ProbeResult};
use sonde_store::{Store, StoreError};

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(15 * 60);

fn retention_cutoff() -> String {
    (Utc::now() - Duration::hours(24)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Success/error/timeout counts plus p50/p95 duration over a set of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub success_count: usize,
    pub error_count: usize,
    pub timeout_count: usize,
    pub p50_duration_ms: Option<i64>,
    pub p95_duration_ms: Option<i64>,
}

fn percentile(sorted_durations: &[i64], pct: f64) -> Option<i64> {
    if sorted_durations.is_empty() {
        return None;
    }
    let rank = ((pct * sorted_durations.len() as f64).ceil() as usize).saturating_sub(1);
    let idx = rank.min(sorted_durations.len() - 1);
    Some(sorted_durations[idx])
}

fn aggregate(results: &[ProbeResult]) -> Aggregate {
    let mut agg = Aggregate::default();
    let mut durations: Vec<i64> = Vec::with_capacity(results.len());
    for r in results {
        match r.status {
            ProbeStatus::Success => agg.success_count += 1,
            ProbeStatus::Error => agg.error_count += 1,
            ProbeStatus::Timeout => agg.timeout_count += 1,
        }
        durations.push(r.duration_ms);
    }
    durations.sort_unstable();
    agg.p50_duration_ms = percentile(&durations, 0.50);
    agg.p95_duration_ms = percentile(&durations, 0.95);
    agg
}

/// Wraps the store's raw probe-result table with the 24h retention
/// policy: eviction on a periodic sweep, once at startup, and defensively
/// before every aggregate read, so an observer never sees an expired row
/// even if the sweep task is lagging (spec.md §8 quantified invariant).
#[derive(Clone)]
pub struct TrendingStore {
    store: Store,
}

impl TrendingStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn record(&self, new: NewProbeResult) -> Result<ProbeResult, StoreError> {
        self.store.insert_probe_result(new)
    }

    pub fn evict_expired(&self) -> Result<usize, StoreError> {
        self.store.evict_probe_results_before(&retention_cutoff())
    }

    pub fn bucket_by_probe(&self, probe: &str) -> Result<Aggregate, StoreError> {
        self.evict_expired()?;
        let rows = self.store.list_probe_results_by_probe_since(probe, &retention_cutoff())?;
        Ok(aggregate(&rows))
    }

    pub fn bucket_by_agent(&self, agent: &str) -> Result<Aggregate, StoreError> {
        self.evict_expired()?;
        let rows = self.store.list_probe_results_by_agent_since(agent, &retention_cutoff())?;
        Ok(aggregate(&rows))
    }

    pub fn overall(&self) -> Result<Aggregate, StoreError> {
        self.evict_expired()?;
        let rows = self.store.list_probe_results_since(&retention_cutoff())?;
        Ok(aggregate(&rows))
    }

    /// Spawns the periodic eviction sweep: once immediately at startup,
    /// then every 15 minutes thereafter (spec.md §4.I).
    pub fn spawn_sweep(&self) -> tokio::task::JoinHandle<()> {
        let trending = self.clone();
        tokio::spawn(async move {
            if let Err(err) = trending.evict_expired() {
                tracing::warn!(?err, "startup trending eviction sweep failed");
            }
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately; already swept above
            loop {
                interval.tick().await;
                match trending.evict_expired() {
                    Ok(evicted) if evicted > 0 => tracing::debug!(evicted, "evicted expired probe results"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(?err, "trending eviction sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(probe: &str, status: ProbeStatus, duration_ms: i64) -> NewProbeResult {
        NewProbeResult {
            probe: probe.into(),
            agent: Some("edge-01".into()),
            integration_id: None,
            status,
            duration_ms,
            data_json: None,
            error_text: None,
        }
    }

    #[test]
    fn aggregates_success_and_error_counts() {
        let trending = TrendingStore::new(Store::open_in_memory().unwrap());
        trending.record(sample("ping", ProbeStatus::Success, 10)).unwrap();
        trending.record(sample("ping", ProbeStatus::Success, 20)).unwrap();
        trending.record(sample("ping", ProbeStatus::Error, 30)).unwrap();

        let agg = trending.bucket_by_probe("ping").unwrap();
        assert_eq!(agg.success_count, 2);
        assert_eq!(agg.error_count, 1);
        assert_eq!(agg.p50_duration_ms, Some(20));
    }

    #[test]
    fn evicts_rows_older_than_the_retention_window() {
        let store = Store::open_in_memory().unwrap();
        let trending = TrendingStore::new(store.clone());
        trending.record(sample("ping", ProbeStatus::Success, 10)).unwrap();
        // Simulate the row having aged out by evicting with a future cutoff.
        let evicted = store
            .evict_probe_results_before(&(Utc::now() + Duration::days(1)).to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(trending.bucket_by_probe("ping").unwrap(), Aggregate::default());
    }

    #[test]
    fn empty_bucket_has_no_percentiles() {
        let trending = TrendingStore::new(Store::open_in_memory().unwrap());
        let agg = trending.bucket_by_probe("never-seen").unwrap();
        assert_eq!(agg.p50_duration_ms, None);
        assert_eq!(agg.p95_duration_ms, None);
    }
}
