//! Outage detection.
//!
//! An outage is a contiguous run of scans in which the fraction of unreachable
//! checkpoints meets the configured threshold. The detector only decides; the
//! scheduler persists what it decided.

mod detector;

pub use detector::*;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Detector error types.
#[derive(Error, Debug, PartialEq)]
pub enum DetectorError {
    #[error("snapshot at {scanned_at} is not after the last applied scan at {last_scan}")]
    OutOfOrder {
        scanned_at: DateTime<Utc>,
        last_scan: DateTime<Utc>,
    },
}

/// A detected outage, ongoing or closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutageState {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    /// Checkpoint ids seen unreachable at any point of the outage
    pub affected: BTreeSet<i64>,
    pub is_ongoing: bool,
}

impl OutageState {
    /// A freshly opened outage that has no store id yet.
    pub fn opened(started_at: DateTime<Utc>, affected: BTreeSet<i64>) -> Self {
        Self {
            id: 0,
            started_at,
            ended_at: None,
            duration_seconds: None,
            affected,
            is_ongoing: true,
        }
    }
}

/// State change produced by one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Unchanged,
    Opened {
        started_at: DateTime<Utc>,
        affected: BTreeSet<i64>,
    },
    Extended {
        id: i64,
        added: BTreeSet<i64>,
        affected: BTreeSet<i64>,
    },
    Closed {
        id: i64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        duration: ChronoDuration,
    },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Unchanged => "unchanged",
            Transition::Opened { .. } => "opened",
            Transition::Extended { .. } => "extended",
            Transition::Closed { .. } => "closed",
        }
    }
}
