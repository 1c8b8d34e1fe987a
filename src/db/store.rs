//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::outage::{OutageState, Transition};
use crate::probe::{FleetSnapshot, ProbeResult};

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
    #[error("A checkpoint named {0:?} already exists")]
    DuplicateName(String),
    #[error("Checkpoint {0} has check history; disable it instead")]
    CheckpointInUse(i64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Checkpoint registry ---

    /// Register a new checkpoint.
    pub fn add_checkpoint(&self, name: &str, address: &str) -> Result<Checkpoint, DbError> {
        let name = name.trim();
        let address = address.trim();
        if name.is_empty() {
            return Err(DbError::InvalidInput("name must not be empty".to_string()));
        }
        if address.is_empty() {
            return Err(DbError::InvalidInput("address must not be empty".to_string()));
        }

        let now = Utc::now();
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO checkpoints (name, address, probe_kind, enabled, created_at, updated_at) VALUES (?1, ?2, 'http', 1, ?3, ?3)",
            params![name, address, fmt_db_time(now)],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(DbError::DuplicateName(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        Ok(Checkpoint {
            id,
            name: name.to_string(),
            address: address.to_string(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        })
    }

    /// List checkpoints ordered by id.
    pub fn list_checkpoints(&self, enabled_only: bool) -> Result<Vec<Checkpoint>, DbError> {
        let conn = self.conn()?;
        let sql = if enabled_only {
            "SELECT id, name, address, probe_kind, enabled, created_at, updated_at FROM checkpoints WHERE enabled = 1 ORDER BY id"
        } else {
            "SELECT id, name, address, probe_kind, enabled, created_at, updated_at FROM checkpoints ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let checkpoints = stmt
            .query_map([], checkpoint_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checkpoints)
    }

    /// Get a checkpoint by ID.
    pub fn get_checkpoint(&self, id: i64) -> Result<Checkpoint, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, address, probe_kind, enabled, created_at, updated_at FROM checkpoints WHERE id = ?1",
            params![id],
            checkpoint_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Get a checkpoint by its unique name.
    pub fn get_checkpoint_by_name(&self, name: &str) -> Result<Checkpoint, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, address, probe_kind, enabled, created_at, updated_at FROM checkpoints WHERE name = ?1",
            params![name],
            checkpoint_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Enable or disable a checkpoint.
    pub fn set_checkpoint_enabled(&self, id: i64, enabled: bool) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE checkpoints SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, fmt_db_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Change the network address of a checkpoint.
    pub fn set_checkpoint_address(&self, id: i64, address: &str) -> Result<(), DbError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(DbError::InvalidInput("address must not be empty".to_string()));
        }
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE checkpoints SET address = ?1, updated_at = ?2 WHERE id = ?3",
            params![address, fmt_db_time(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Delete a checkpoint that has no check history.
    pub fn remove_checkpoint(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let history: i64 = conn.query_row(
            "SELECT COUNT(*) FROM power_checks WHERE checkpoint_id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        if history > 0 {
            return Err(DbError::CheckpointInUse(id));
        }
        let changed = conn.execute("DELETE FROM checkpoints WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Check records ---

    /// Persist the results of one scan.
    pub fn record_probe_results(
        &self,
        scanned_at: DateTime<Utc>,
        results: &[ProbeResult],
    ) -> Result<usize, DbError> {
        if results.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let count = insert_checks(&tx, scanned_at, results)?;
        tx.commit()?;
        Ok(count)
    }

    /// Most recent checks first, optionally for one checkpoint and since a time.
    pub fn recent_checks(
        &self,
        checkpoint_id: Option<i64>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pc.id, pc.checkpoint_id, c.name, pc.checked_at, pc.is_online, pc.response_time_ms, pc.status_code, pc.error_message
             FROM power_checks pc
             JOIN checkpoints c ON c.id = pc.checkpoint_id
             WHERE (?1 IS NULL OR pc.checkpoint_id = ?1) AND (?2 IS NULL OR pc.checked_at >= ?2)
             ORDER BY pc.checked_at DESC, pc.id DESC
             LIMIT ?3",
        )?;
        let checks = stmt
            .query_map(
                params![checkpoint_id, since.map(fmt_db_time), limit],
                check_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    /// The latest check of a checkpoint.
    pub fn latest_check(&self, checkpoint_id: i64) -> Result<Option<CheckRecord>, DbError> {
        Ok(self
            .recent_checks(Some(checkpoint_id), None, 1)?
            .into_iter()
            .next())
    }

    /// Percentage of online checks of a checkpoint since a time, 0 without checks.
    pub fn uptime_percentage(&self, checkpoint_id: i64, since: DateTime<Utc>) -> Result<f64, DbError> {
        let conn = self.conn()?;
        let (total, online): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_online), 0) FROM power_checks WHERE checkpoint_id = ?1 AND checked_at >= ?2",
            params![checkpoint_id, fmt_db_time(since)],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(online as f64 / total as f64 * 100.0)
    }

    /// Delete checks older than the cutoff that do not fall inside an ongoing outage.
    ///
    /// Returns the number of deleted checks.
    pub fn purge_checks_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let cutoff = fmt_db_time(cutoff);
        let tx = conn.unchecked_transaction()?;
        let deleted = tx.execute(
            "DELETE FROM power_checks
             WHERE checked_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM power_outages o
                   WHERE o.is_ongoing = 1 AND power_checks.checked_at >= o.started_at
               )",
            params![cutoff],
        )?;
        tx.execute(
            "DELETE FROM scans
             WHERE scanned_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM power_outages o
                   WHERE o.is_ongoing = 1 AND scans.scanned_at >= o.started_at
               )
               AND scanned_at < (SELECT MAX(scanned_at) FROM scans)",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    // --- Outages ---

    /// Insert a new ongoing outage and return its ID.
    pub fn open_outage(&self, outage: &OutageState) -> Result<i64, DbError> {
        let conn = self.conn()?;
        insert_outage(&conn, outage)
    }

    /// Replace the affected set of an ongoing outage.
    pub fn extend_outage(&self, id: i64, affected: &BTreeSet<i64>) -> Result<(), DbError> {
        let conn = self.conn()?;
        update_outage_affected(&conn, id, affected)
    }

    /// Close an ongoing outage.
    pub fn close_outage(
        &self,
        id: i64,
        ended_at: DateTime<Utc>,
        duration_seconds: i64,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        mark_outage_closed(&conn, id, ended_at, duration_seconds)
    }

    /// The ongoing outage, if any.
    pub fn load_current_outage(&self) -> Result<Option<OutageState>, DbError> {
        let conn = self.conn()?;
        let outage = conn
            .query_row(
                "SELECT id, started_at, ended_at, duration_seconds, affected, is_ongoing FROM power_outages WHERE is_ongoing = 1",
                [],
                outage_from_row,
            )
            .optional()?;
        Ok(outage)
    }

    /// Outages started since a time, most recent first.
    pub fn outages(
        &self,
        since: DateTime<Utc>,
        ongoing_only: bool,
        limit: i64,
    ) -> Result<Vec<OutageState>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, ended_at, duration_seconds, affected, is_ongoing FROM power_outages
             WHERE started_at >= ?1 AND (?2 = 0 OR is_ongoing = 1)
             ORDER BY started_at DESC
             LIMIT ?3",
        )?;
        let outages = stmt
            .query_map(params![fmt_db_time(since), ongoing_only, limit], outage_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(outages)
    }

    // --- Scans ---

    /// Timestamp of the last committed scan.
    pub fn last_scan_time(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let conn = self.conn()?;
        let result: Option<String> =
            conn.query_row("SELECT MAX(scanned_at) FROM scans", [], |row| row.get(0))?;
        Ok(result.and_then(|s| parse_db_time(&s)))
    }

    /// Persist everything one scan cycle produced in a single transaction.
    ///
    /// Returns the ID of an outage opened by this scan.
    pub fn commit_scan(
        &self,
        snapshot: &FleetSnapshot,
        transition: &Transition,
    ) -> Result<Option<i64>, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO scans (scanned_at, total, offline) VALUES (?1, ?2, ?3)",
            params![
                fmt_db_time(snapshot.scanned_at),
                snapshot.total() as i64,
                snapshot.offline_count() as i64,
            ],
        )?;
        insert_checks(&tx, snapshot.scanned_at, &snapshot.results)?;

        let opened = match transition {
            Transition::Unchanged => None,
            Transition::Opened {
                started_at,
                affected,
            } => Some(insert_outage(
                &tx,
                &OutageState::opened(*started_at, affected.clone()),
            )?),
            Transition::Extended { id, affected, .. } => {
                update_outage_affected(&tx, *id, affected)?;
                None
            }
            Transition::Closed {
                id,
                ended_at,
                duration,
                ..
            } => {
                mark_outage_closed(&tx, *id, *ended_at, duration.num_seconds())?;
                None
            }
        };

        tx.commit()?;
        Ok(opened)
    }

    // --- Statistics ---

    /// Outages started since a time.
    pub fn count_outages_since(&self, since: DateTime<Utc>) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM power_outages WHERE started_at >= ?1",
            params![fmt_db_time(since)],
            |r| r.get(0),
        )?)
    }

    /// Check and outage statistics since a time.
    pub fn statistics(&self, since: DateTime<Utc>) -> Result<Statistics, DbError> {
        let conn = self.conn()?;
        let since = fmt_db_time(since);

        let (total_checks, failed_checks): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_online = 0 THEN 1 ELSE 0 END), 0) FROM power_checks WHERE checked_at >= ?1",
            params![since],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let (total_outages, avg_duration): (i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), AVG(CASE WHEN is_ongoing = 0 THEN duration_seconds END) FROM power_outages WHERE started_at >= ?1",
            params![since],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let success_rate = if total_checks > 0 {
            (total_checks - failed_checks) as f64 / total_checks as f64 * 100.0
        } else {
            0.0
        };

        Ok(Statistics {
            total_checks,
            failed_checks,
            success_rate,
            total_outages,
            average_outage_duration_seconds: avg_duration.unwrap_or(0.0),
        })
    }
}

fn insert_checks(
    conn: &Connection,
    scanned_at: DateTime<Utc>,
    results: &[ProbeResult],
) -> Result<usize, DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO power_checks (checkpoint_id, checked_at, is_online, response_time_ms, status_code, error_message) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let checked_at = fmt_db_time(scanned_at);
    for r in results {
        stmt.execute(params![
            r.checkpoint_id,
            checked_at,
            r.is_reachable(),
            r.latency().map(|l| l.as_secs_f64() * 1000.0),
            r.status(),
            r.failure_reason(),
        ])?;
    }
    Ok(results.len())
}

fn insert_outage(conn: &Connection, outage: &OutageState) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO power_outages (started_at, ended_at, duration_seconds, affected, is_ongoing) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            fmt_db_time(outage.started_at),
            outage.ended_at.map(fmt_db_time),
            outage.duration_seconds,
            serde_json::to_string(&outage.affected)?,
            outage.is_ongoing,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn update_outage_affected(
    conn: &Connection,
    id: i64,
    affected: &BTreeSet<i64>,
) -> Result<(), DbError> {
    let changed = conn.execute(
        "UPDATE power_outages SET affected = ?1 WHERE id = ?2 AND is_ongoing = 1",
        params![serde_json::to_string(affected)?, id],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

fn mark_outage_closed(
    conn: &Connection,
    id: i64,
    ended_at: DateTime<Utc>,
    duration_seconds: i64,
) -> Result<(), DbError> {
    let changed = conn.execute(
        "UPDATE power_outages SET ended_at = ?1, duration_seconds = ?2, is_ongoing = 0 WHERE id = ?3 AND is_ongoing = 1",
        params![fmt_db_time(ended_at), duration_seconds, id],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

fn checkpoint_from_row(row: &Row<'_>) -> SqlResult<Checkpoint> {
    let kind: String = row.get(3)?;
    Ok(Checkpoint {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        probe_kind: kind.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        enabled: row.get(4)?,
        created_at: time_column(row, 5)?,
        updated_at: time_column(row, 6)?,
    })
}

fn check_from_row(row: &Row<'_>) -> SqlResult<CheckRecord> {
    Ok(CheckRecord {
        id: row.get(0)?,
        checkpoint_id: row.get(1)?,
        checkpoint_name: row.get(2)?,
        checked_at: time_column(row, 3)?,
        is_online: row.get(4)?,
        response_time_ms: row.get(5)?,
        status_code: row.get(6)?,
        error_message: row.get(7)?,
    })
}

fn outage_from_row(row: &Row<'_>) -> SqlResult<OutageState> {
    let ended_at: Option<String> = row.get(2)?;
    let affected: String = row.get(4)?;
    Ok(OutageState {
        id: row.get(0)?,
        started_at: time_column(row, 1)?,
        ended_at: ended_at.as_deref().and_then(parse_db_time),
        duration_seconds: row.get(3)?,
        affected: serde_json::from_str(&affected).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        is_ongoing: row.get(5)?,
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {}", s).into(),
        )
    })
}

/// Format a timestamp the way it is stored; fixed width so text order is time order.
fn fmt_db_time(dt: DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [DB_TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn t(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn snapshot(at: DateTime<Utc>, fleet: &[Checkpoint], down: &[i64]) -> FleetSnapshot {
        let results = fleet
            .iter()
            .map(|cp| {
                if down.contains(&cp.id) {
                    ProbeResult::unreachable(cp, "timeout")
                } else {
                    ProbeResult::reachable(cp, Duration::from_millis(20), 200)
                }
            })
            .collect();
        FleetSnapshot::new(at, results)
    }

    #[test]
    fn test_checkpoint_registry() {
        let (_tmp, store) = store();

        let a = store.add_checkpoint("kitchen", "192.168.1.10").unwrap();
        let b = store.add_checkpoint("garage", "192.168.1.11").unwrap();
        assert!(a.id > 0 && b.id > a.id);
        assert!(a.enabled);

        assert!(matches!(
            store.add_checkpoint("kitchen", "10.0.0.1"),
            Err(DbError::DuplicateName(name)) if name == "kitchen"
        ));
        assert!(matches!(store.add_checkpoint(" ", "10.0.0.1"), Err(DbError::InvalidInput(_))));

        store.set_checkpoint_enabled(b.id, false).unwrap();
        let enabled = store.list_checkpoints(true).unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "kitchen");
        assert_eq!(store.list_checkpoints(false).unwrap().len(), 2);

        store.set_checkpoint_address(a.id, "192.168.1.99").unwrap();
        assert_eq!(store.get_checkpoint(a.id).unwrap().address, "192.168.1.99");
        assert_eq!(store.get_checkpoint_by_name("garage").unwrap().id, b.id);

        assert!(matches!(store.set_checkpoint_enabled(999, true), Err(DbError::NotFound)));
        assert!(matches!(store.get_checkpoint(999), Err(DbError::NotFound)));

        store.remove_checkpoint(b.id).unwrap();
        assert!(matches!(store.get_checkpoint(b.id), Err(DbError::NotFound)));
        assert!(matches!(store.remove_checkpoint(b.id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_remove_refuses_checkpoint_with_history() {
        let (_tmp, store) = store();
        let a = store.add_checkpoint("porch", "10.0.0.5").unwrap();
        store
            .record_probe_results(t(1, 0), &[ProbeResult::unreachable(&a, "timeout")])
            .unwrap();

        assert!(matches!(store.remove_checkpoint(a.id), Err(DbError::CheckpointInUse(id)) if id == a.id));
        store.set_checkpoint_enabled(a.id, false).unwrap();
    }

    #[test]
    fn test_checks_and_uptime() {
        let (_tmp, store) = store();
        let a = store.add_checkpoint("a", "10.0.0.1").unwrap();

        store
            .record_probe_results(t(1, 0), &[ProbeResult::reachable(&a, Duration::from_millis(15), 404)])
            .unwrap();
        store
            .record_probe_results(t(1, 1), &[ProbeResult::unreachable(&a, "connection refused")])
            .unwrap();
        store
            .record_probe_results(t(1, 2), &[ProbeResult::reachable(&a, Duration::from_millis(15), 200)])
            .unwrap();
        store
            .record_probe_results(t(1, 3), &[ProbeResult::reachable(&a, Duration::from_millis(15), 200)])
            .unwrap();

        let checks = store.recent_checks(Some(a.id), None, 10).unwrap();
        assert_eq!(checks.len(), 4);
        assert_eq!(checks[0].checked_at, t(1, 3));
        assert_eq!(checks[2].error_message.as_deref(), Some("connection refused"));
        assert_eq!(checks[2].response_time_ms, None);
        assert_eq!(checks[3].status_code, Some(404));
        assert_eq!(checks[3].checkpoint_name, "a");

        let latest = store.latest_check(a.id).unwrap().unwrap();
        assert!(latest.is_online);

        assert_eq!(store.uptime_percentage(a.id, t(1, 0)).unwrap(), 75.0);
        assert_eq!(store.uptime_percentage(a.id, t(2, 0)).unwrap(), 0.0);
        assert_eq!(store.recent_checks(None, Some(t(1, 2)), 10).unwrap().len(), 2);
    }

    #[test]
    fn test_commit_scan_lifecycle() {
        let (_tmp, store) = store();
        let fleet: Vec<Checkpoint> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, name)| store.add_checkpoint(name, &format!("10.0.0.{}", i + 1)).unwrap())
            .collect();
        let ids: Vec<i64> = fleet.iter().map(|c| c.id).collect();

        let opened = store
            .commit_scan(
                &snapshot(t(1, 0), &fleet, &ids[..3]),
                &Transition::Opened {
                    started_at: t(1, 0),
                    affected: ids[..3].iter().copied().collect(),
                },
            )
            .unwrap()
            .unwrap();

        let current = store.load_current_outage().unwrap().unwrap();
        assert_eq!(current.id, opened);
        assert_eq!(current.started_at, t(1, 0));
        assert!(current.is_ongoing);

        store
            .commit_scan(
                &snapshot(t(1, 1), &fleet, &ids),
                &Transition::Extended {
                    id: opened,
                    added: BTreeSet::from([ids[3]]),
                    affected: ids.iter().copied().collect(),
                },
            )
            .unwrap();
        assert_eq!(store.load_current_outage().unwrap().unwrap().affected.len(), 4);

        store
            .commit_scan(
                &snapshot(t(1, 2), &fleet, &[]),
                &Transition::Closed {
                    id: opened,
                    started_at: t(1, 0),
                    ended_at: t(1, 2),
                    duration: ChronoDuration::hours(2),
                },
            )
            .unwrap();

        assert!(store.load_current_outage().unwrap().is_none());
        assert_eq!(store.last_scan_time().unwrap(), Some(t(1, 2)));
        assert_eq!(store.recent_checks(None, None, 100).unwrap().len(), 12);

        let history = store.outages(t(1, 0), false, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].duration_seconds, Some(7200));
        assert_eq!(history[0].ended_at, Some(t(1, 2)));
        assert!(!history[0].is_ongoing);
        assert!(store.outages(t(1, 0), true, 10).unwrap().is_empty());

        let stats = store.statistics(t(1, 0)).unwrap();
        assert_eq!(stats.total_checks, 12);
        assert_eq!(stats.failed_checks, 7);
        assert_eq!(stats.total_outages, 1);
        assert_eq!(stats.average_outage_duration_seconds, 7200.0);
    }

    #[test]
    fn test_failed_commit_writes_nothing() {
        let (_tmp, store) = store();
        let a = store.add_checkpoint("a", "10.0.0.1").unwrap();

        // Closing an outage that does not exist fails after the checks were inserted.
        let result = store.commit_scan(
            &snapshot(t(1, 0), &[a], &[]),
            &Transition::Closed {
                id: 77,
                started_at: t(1, 0),
                ended_at: t(1, 0),
                duration: ChronoDuration::zero(),
            },
        );
        assert!(matches!(result, Err(DbError::NotFound)));
        assert!(store.recent_checks(None, None, 10).unwrap().is_empty());
        assert!(store.last_scan_time().unwrap().is_none());
    }

    #[test]
    fn test_single_ongoing_outage_enforced() {
        let (_tmp, store) = store();
        store.open_outage(&OutageState::opened(t(1, 0), BTreeSet::from([1]))).unwrap();
        assert!(store
            .open_outage(&OutageState::opened(t(1, 1), BTreeSet::from([2])))
            .is_err());
    }

    #[test]
    fn test_outage_sink_operations() {
        let (_tmp, store) = store();
        let id = store.open_outage(&OutageState::opened(t(2, 0), BTreeSet::from([1]))).unwrap();
        store.extend_outage(id, &BTreeSet::from([1, 2])).unwrap();
        store.close_outage(id, t(2, 1), 3600).unwrap();
        assert!(matches!(store.close_outage(id, t(2, 2), 7200), Err(DbError::NotFound)));
        assert!(matches!(store.extend_outage(id, &BTreeSet::from([3])), Err(DbError::NotFound)));

        let outage = &store.outages(t(1, 0), false, 10).unwrap()[0];
        assert_eq!(outage.affected, BTreeSet::from([1, 2]));
        assert_eq!(outage.duration_seconds, Some(3600));
    }

    #[test]
    fn test_purge_keeps_ongoing_outage_window() {
        let (_tmp, store) = store();
        let a = store.add_checkpoint("a", "10.0.0.1").unwrap();
        for day in 1..=5 {
            store
                .record_probe_results(t(day, 0), &[ProbeResult::unreachable(&a, "timeout")])
                .unwrap();
        }
        // Outage started on day 3 is still ongoing.
        store.open_outage(&OutageState::opened(t(3, 0), BTreeSet::from([a.id]))).unwrap();

        let deleted = store.purge_checks_before(t(5, 0)).unwrap();
        assert_eq!(deleted, 2);

        let remaining: Vec<DateTime<Utc>> = store
            .recent_checks(None, None, 10)
            .unwrap()
            .into_iter()
            .map(|c| c.checked_at)
            .collect();
        assert_eq!(remaining, vec![t(5, 0), t(4, 0), t(3, 0)]);
    }

    #[test]
    fn test_purge_after_outage_closed() {
        let (_tmp, store) = store();
        let a = store.add_checkpoint("a", "10.0.0.1").unwrap();
        for day in 1..=3 {
            store
                .record_probe_results(t(day, 0), &[ProbeResult::unreachable(&a, "timeout")])
                .unwrap();
        }
        let id = store.open_outage(&OutageState::opened(t(1, 0), BTreeSet::from([a.id]))).unwrap();
        assert_eq!(store.purge_checks_before(t(3, 0)).unwrap(), 0);

        store.close_outage(id, t(2, 0), 86400).unwrap();
        assert_eq!(store.purge_checks_before(t(3, 0)).unwrap(), 2);
    }

    #[test]
    fn test_parse_db_time() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_db_time(&fmt_db_time(dt)), Some(dt));
        assert_eq!(parse_db_time("2024-01-02 03:04:05"), Some(dt));
        assert_eq!(parse_db_time("2024-01-02T03:04:05Z"), Some(dt));
        assert_eq!(parse_db_time("garbage"), None);
    }
}
