//! Scheduler module for running scan cycles and retention sweeps.

mod retention;
mod scan;

pub use retention::*;
pub use scan::*;

use crate::config::ServerConfig;
use crate::db::{DbError, Persistence};
use crate::outage::{DetectorError, OutageDetector, OutageState, Transition};
use crate::probe::Prober;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Reasons a scan cycle did not take effect.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] DbError),
    #[error("snapshot rejected: {0}")]
    Detector(#[from] DetectorError),
}

/// Summary of one committed scan cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub scanned_at: DateTime<Utc>,
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub outage_condition: bool,
    pub transition: &'static str,
    pub outage_id: Option<i64>,
}

/// Runs scan cycles and owns the outage detector.
pub struct Scheduler {
    persistence: Arc<dyn Persistence>,
    scanner: FleetScanner,
    detector: RwLock<OutageDetector>,
    cycle: Mutex<()>,
    interval: Duration,
    running: Mutex<Option<(broadcast::Sender<()>, JoinHandle<()>)>>,
}

impl Scheduler {
    /// Create a scheduler, restoring any ongoing outage from storage.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        prober: Arc<dyn Prober>,
        cfg: &ServerConfig,
    ) -> Result<Self, DbError> {
        let current = persistence.load_current_outage()?;
        let last_scan = persistence.last_scan_time()?;
        if let Some(outage) = &current {
            tracing::info!(
                "Resuming ongoing outage {} started at {}",
                outage.id,
                outage.started_at
            );
        }

        Ok(Self {
            persistence,
            scanner: FleetScanner::new(prober, cfg.probe_timeout, cfg.max_concurrency),
            detector: RwLock::new(OutageDetector::resume(cfg.outage_threshold, current, last_scan)),
            cycle: Mutex::new(()),
            interval: cfg.scan_interval,
            running: Mutex::new(None),
        })
    }

    /// The ongoing outage as last committed.
    pub async fn current_outage(&self) -> Option<OutageState> {
        self.detector.read().await.current().cloned()
    }

    pub fn scanner(&self) -> &FleetScanner {
        &self.scanner
    }

    /// Run one scan cycle: probe the fleet, detect, persist, commit.
    ///
    /// Cycles never overlap. On error nothing of this cycle is kept and the
    /// next cycle starts again from the last committed state.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let _cycle = self.cycle.lock().await;

        let checkpoints = self.persistence.list_enabled_checkpoints()?;
        let snapshot = self.scanner.scan(checkpoints).await;

        // No await between persisting and committing: a dropped cycle must
        // leave the detector and the store in step.
        let mut detector = self.detector.write().await;
        let evaluation = detector.evaluate(&snapshot)?;
        let opened = self
            .persistence
            .commit_scan(&snapshot, &evaluation.transition)?;
        detector.commit(&evaluation, opened)?;
        drop(detector);

        let outage_id = match &evaluation.transition {
            Transition::Unchanged => None,
            Transition::Opened { .. } => {
                let offline: Vec<&str> = snapshot
                    .results
                    .iter()
                    .filter(|r| !r.is_reachable())
                    .map(|r| r.checkpoint_name.as_str())
                    .collect();
                tracing::warn!(
                    "Power outage detected! {}/{} checkpoints offline: {}",
                    evaluation.offline,
                    evaluation.total,
                    offline.join(", ")
                );
                opened
            }
            Transition::Extended { id, added, affected } => {
                tracing::warn!(
                    "Outage {} spread to {} more checkpoints ({} affected)",
                    id,
                    added.len(),
                    affected.len()
                );
                Some(*id)
            }
            Transition::Closed { id, duration, .. } => {
                tracing::info!(
                    "Power outage {} ended! Duration: {} seconds",
                    id,
                    duration.num_seconds()
                );
                Some(*id)
            }
        };

        tracing::info!(
            "Scan completed: {}/{} online, {} offline",
            snapshot.online_count(),
            snapshot.total(),
            snapshot.offline_count()
        );

        Ok(CycleReport {
            scanned_at: snapshot.scanned_at,
            total: snapshot.total(),
            online: snapshot.online_count(),
            offline: snapshot.offline_count(),
            outage_condition: evaluation.outage_condition,
            transition: evaluation.transition.name(),
            outage_id,
        })
    }

    /// Start the scan loop in the background.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        let scheduler = self.clone();

        tracing::info!("Starting scheduler with a {:?} scan interval", self.interval);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        let started = Instant::now();
                        tokio::select! {
                            _ = rx.recv() => {
                                tracing::info!("Scheduler stopped mid-cycle, discarding scan");
                                break;
                            }
                            outcome = scheduler.run_cycle() => {
                                if let Err(e) = outcome {
                                    tracing::error!("Scan cycle failed: {}", e);
                                }
                            }
                        }

                        let elapsed = started.elapsed();
                        if elapsed > scheduler.interval {
                            tracing::warn!(
                                "Scan cycle took {:?}, longer than the {:?} interval; next cycle delayed",
                                elapsed,
                                scheduler.interval
                            );
                        }
                    }
                }
            }
        });

        *running = Some((tx, handle));
    }

    /// Stop the scan loop and wait for it to exit.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some((tx, handle)) = running {
            let _ = tx.send(());
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task ended abnormally: {}", e);
            }
            tracing::info!("Scheduler stopped");
        }
    }
}
