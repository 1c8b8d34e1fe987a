//! Probe module for checkpoint reachability.
//!
//! A probe answers one question: did the checkpoint answer at all? Only HTTP
//! probes exist; the probe kind is a tagged variant so other protocols can be
//! slotted in next to it.

mod http;

pub use http::*;

use crate::db::Checkpoint;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
///
/// These never escape a scan: each one is turned into an unreachable result.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused")]
    ConnectionRefused,
    #[error("dns failure: {0}")]
    Dns(String),
    #[error("tls failure: {0}")]
    Tls(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProbeError {
    /// Short human-readable reason stored with an unreachable check.
    pub fn reason(&self) -> String {
        match self {
            ProbeError::Timeout(_) => "timeout".to_string(),
            ProbeError::ConnectionRefused => "connection refused".to_string(),
            ProbeError::Dns(_) => "dns failure".to_string(),
            ProbeError::Tls(_) => "tls failure".to_string(),
            other => other.to_string(),
        }
    }
}

/// Protocol used to probe a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Http,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Http => "http",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(ProbeKind::Http),
            other => Err(ProbeError::Config(format!("unknown probe kind: {}", other))),
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The checkpoint produced an HTTP response, whatever its status.
    Reachable { latency: Duration, status: u16 },
    /// No response: network failure or timeout.
    Unreachable { reason: String },
}

/// Result of probing one checkpoint during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub checkpoint_id: i64,
    pub checkpoint_name: String,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn reachable(checkpoint: &Checkpoint, latency: Duration, status: u16) -> Self {
        Self {
            checkpoint_id: checkpoint.id,
            checkpoint_name: checkpoint.name.clone(),
            outcome: ProbeOutcome::Reachable { latency, status },
        }
    }

    pub fn unreachable(checkpoint: &Checkpoint, reason: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint.id,
            checkpoint_name: checkpoint.name.clone(),
            outcome: ProbeOutcome::Unreachable {
                reason: reason.into(),
            },
        }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Reachable { .. })
    }

    pub fn latency(&self) -> Option<Duration> {
        match &self.outcome {
            ProbeOutcome::Reachable { latency, .. } => Some(*latency),
            ProbeOutcome::Unreachable { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.outcome {
            ProbeOutcome::Reachable { status, .. } => Some(*status),
            ProbeOutcome::Unreachable { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            ProbeOutcome::Reachable { .. } => None,
            ProbeOutcome::Unreachable { reason } => Some(reason),
        }
    }
}

/// All probe results of one scan pass.
///
/// Holds exactly one result per scanned checkpoint, sorted by checkpoint id.
#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    pub scanned_at: DateTime<Utc>,
    pub results: Vec<ProbeResult>,
}

impl FleetSnapshot {
    pub fn new(scanned_at: DateTime<Utc>, mut results: Vec<ProbeResult>) -> Self {
        results.sort_by_key(|r| r.checkpoint_id);
        results.dedup_by_key(|r| r.checkpoint_id);
        Self { scanned_at, results }
    }

    /// Number of enabled checkpoints scanned.
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn offline_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_reachable()).count()
    }

    pub fn online_count(&self) -> usize {
        self.total() - self.offline_count()
    }

    pub fn unreachable_ids(&self) -> BTreeSet<i64> {
        self.results
            .iter()
            .filter(|r| !r.is_reachable())
            .map(|r| r.checkpoint_id)
            .collect()
    }
}

/// Strategy that probes one checkpoint.
///
/// Implementations must resolve within `timeout` and never retry.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, checkpoint: &Checkpoint, timeout: Duration) -> ProbeResult;
}

/// Prober that dispatches on the checkpoint's probe kind.
pub struct ProbeExecutor {
    http: HttpProber,
}

impl ProbeExecutor {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            http: HttpProber::new()?,
        })
    }
}

#[async_trait]
impl Prober for ProbeExecutor {
    async fn probe(&self, checkpoint: &Checkpoint, timeout: Duration) -> ProbeResult {
        match checkpoint.probe_kind {
            ProbeKind::Http => self.http.probe(checkpoint, timeout).await,
        }
    }
}
