//! Database module for PowerWatch.
//!
//! Provides SQLite storage with embedded migrations, plus the [`Persistence`]
//! seam the scan scheduler writes through.

mod models;
mod store;

pub use models::*;
pub use store::*;

use crate::outage::{OutageState, Transition};
use crate::probe::FleetSnapshot;

use chrono::{DateTime, Utc};

/// Storage operations the monitoring engine depends on.
pub trait Persistence: Send + Sync {
    /// Checkpoints to probe in the next scan.
    fn list_enabled_checkpoints(&self) -> Result<Vec<Checkpoint>, DbError>;

    /// The ongoing outage, used to resume detection after a restart.
    fn load_current_outage(&self) -> Result<Option<OutageState>, DbError>;

    /// Timestamp of the last committed scan.
    fn last_scan_time(&self) -> Result<Option<DateTime<Utc>>, DbError>;

    /// Persist checks, the scan record and the outage transition atomically.
    ///
    /// Returns the ID of an outage opened by this scan.
    fn commit_scan(
        &self,
        snapshot: &FleetSnapshot,
        transition: &Transition,
    ) -> Result<Option<i64>, DbError>;

    /// Delete check history older than the cutoff, sparing ongoing outages.
    fn purge_checks_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError>;
}

impl Persistence for Store {
    fn list_enabled_checkpoints(&self) -> Result<Vec<Checkpoint>, DbError> {
        self.list_checkpoints(true)
    }

    fn load_current_outage(&self) -> Result<Option<OutageState>, DbError> {
        Store::load_current_outage(self)
    }

    fn last_scan_time(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        Store::last_scan_time(self)
    }

    fn commit_scan(
        &self,
        snapshot: &FleetSnapshot,
        transition: &Transition,
    ) -> Result<Option<i64>, DbError> {
        Store::commit_scan(self, snapshot, transition)
    }

    fn purge_checks_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        Store::purge_checks_before(self, cutoff)
    }
}
