//! Fleet scan coordinator.

use crate::db::Checkpoint;
use crate::probe::{FleetSnapshot, ProbeResult, Prober};

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Extra time a prober gets past its own timeout before the scan gives up on it.
pub const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

/// Probes every checkpoint of the fleet concurrently.
pub struct FleetScanner {
    prober: Arc<dyn Prober>,
    timeout: Duration,
    max_in_flight: usize,
}

impl FleetScanner {
    pub fn new(prober: Arc<dyn Prober>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            prober,
            timeout,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Probe all checkpoints and return one result per distinct checkpoint.
    ///
    /// Dropping the returned future aborts every probe still in flight.
    pub async fn scan(&self, checkpoints: Vec<Checkpoint>) -> FleetSnapshot {
        let scanned_at = Utc::now();
        let fleet: BTreeMap<i64, Checkpoint> =
            checkpoints.into_iter().map(|cp| (cp.id, cp)).collect();

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for checkpoint in fleet.values().cloned() {
            let prober = self.prober.clone();
            let semaphore = semaphore.clone();
            let timeout = self.timeout;

            tasks.spawn(async move {
                // Hold the permit until the probe resolves.
                let _permit = semaphore.acquire_owned().await.ok();
                match tokio::time::timeout(timeout + TIMEOUT_GRACE, prober.probe(&checkpoint, timeout)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!("Probe for {} overran its timeout", checkpoint.name);
                        ProbeResult::unreachable(&checkpoint, "timeout")
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(fleet.len());
        let mut seen = HashSet::with_capacity(fleet.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if fleet.contains_key(&result.checkpoint_id) && seen.insert(result.checkpoint_id) {
                        results.push(result);
                    }
                }
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }

        for checkpoint in fleet.values() {
            if !seen.contains(&checkpoint.id) {
                results.push(ProbeResult::unreachable(checkpoint, "probe task failed"));
            }
        }

        FleetSnapshot::new(scanned_at, results)
    }
}
