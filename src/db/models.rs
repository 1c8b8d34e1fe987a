//! Database model types.

use crate::probe::ProbeKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored endpoint used as a proxy for power availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub probe_kind: ProbeKind,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: String::new(),
            address: String::new(),
            probe_kind: ProbeKind::Http,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted probe result.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRecord {
    pub id: i64,
    pub checkpoint_id: i64,
    pub checkpoint_name: String,
    pub checked_at: DateTime<Utc>,
    pub is_online: bool,
    /// Time to response headers in milliseconds, only for online checks
    pub response_time_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

/// Aggregate numbers over a time window.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_checks: i64,
    pub failed_checks: i64,
    pub success_rate: f64,
    pub total_outages: i64,
    pub average_outage_duration_seconds: f64,
}
