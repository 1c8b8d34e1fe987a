//! Retention manager for cleaning up old check history.

use crate::db::{DbError, Persistence};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Manager for deleting check records past the retention window.
pub struct RetentionManager {
    persistence: Arc<dyn Persistence>,
    retention: ChronoDuration,
    sweep_interval: Duration,
    sweep_lock: Mutex<()>,
    stop: Mutex<Option<broadcast::Sender<()>>>,
}

impl RetentionManager {
    pub fn new(persistence: Arc<dyn Persistence>, retention_days: i64, sweep_interval: Duration) -> Self {
        Self {
            persistence,
            retention: ChronoDuration::days(retention_days),
            sweep_interval,
            sweep_lock: Mutex::new(()),
            stop: Mutex::new(None),
        }
    }

    /// Purge check records older than the retention window as of `now`.
    ///
    /// Records inside an ongoing outage are kept whatever their age. Returns
    /// `None` when another sweep is already running.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<Option<usize>, DbError> {
        let Ok(_sweep) = self.sweep_lock.try_lock() else {
            tracing::debug!("RetentionManager: sweep already running, skipping");
            return Ok(None);
        };

        let cutoff = now - self.retention;
        let deleted = self.persistence.purge_checks_before(cutoff)?;
        tracing::info!(
            "RetentionManager: Cleaned up {} power check records older than {}",
            deleted,
            cutoff
        );
        Ok(Some(deleted))
    }

    /// Start the retention manager background task.
    pub async fn start(self: &Arc<Self>) {
        let mut stop = self.stop.lock().await;
        if stop.is_some() {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        *stop = Some(tx);

        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = manager.purge_expired(Utc::now()) {
                            tracing::error!("RetentionManager: Failed to purge old checks: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
    }
}
