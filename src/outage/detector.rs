//! The outage state machine.

use super::{DetectorError, OutageState, Transition};
use crate::probe::FleetSnapshot;

use chrono::{DateTime, Utc};

/// Absorbs float noise such as `0.1 * 30 = 3.0000000000000004`.
const THRESHOLD_EPSILON: f64 = 1e-9;

/// Result of evaluating one snapshot against the detector's state.
///
/// Nothing changes until the evaluation is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub scanned_at: DateTime<Utc>,
    pub total: usize,
    pub offline: usize,
    pub outage_condition: bool,
    pub transition: Transition,
}

/// Outage detector holding the last persisted outage state.
#[derive(Debug, Clone)]
pub struct OutageDetector {
    threshold: f64,
    last_scan: Option<DateTime<Utc>>,
    current: Option<OutageState>,
}

impl OutageDetector {
    /// Create a detector with no history.
    pub fn new(threshold: f64) -> Self {
        Self::resume(threshold, None, None)
    }

    /// Create a detector from persisted state.
    pub fn resume(
        threshold: f64,
        current: Option<OutageState>,
        last_scan: Option<DateTime<Utc>>,
    ) -> Self {
        let current = current.filter(|o| o.is_ongoing);
        let last_scan = match (&current, last_scan) {
            (Some(o), Some(t)) => Some(t.max(o.started_at)),
            (Some(o), None) => Some(o.started_at),
            (None, t) => t,
        };

        Self {
            threshold,
            last_scan,
            current,
        }
    }

    /// The ongoing outage, if any.
    pub fn current(&self) -> Option<&OutageState> {
        self.current.as_ref()
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    /// Minimum number of unreachable checkpoints that declares an outage.
    pub fn required_offline(&self, total: usize) -> usize {
        let required = (total as f64 * self.threshold - THRESHOLD_EPSILON).ceil();
        (required.max(1.0)) as usize
    }

    pub fn outage_condition(&self, offline: usize, total: usize) -> bool {
        total > 0 && offline >= self.required_offline(total)
    }

    /// Decide what a snapshot does to the outage state.
    pub fn evaluate(&self, snapshot: &FleetSnapshot) -> Result<Evaluation, DetectorError> {
        self.check_order(snapshot.scanned_at)?;

        let total = snapshot.total();
        let offline = snapshot.offline_count();
        let outage_condition = self.outage_condition(offline, total);

        let transition = match (&self.current, outage_condition) {
            (None, true) => Transition::Opened {
                started_at: snapshot.scanned_at,
                affected: snapshot.unreachable_ids(),
            },
            (Some(ongoing), true) => {
                let added: std::collections::BTreeSet<i64> = snapshot
                    .unreachable_ids()
                    .difference(&ongoing.affected)
                    .copied()
                    .collect();
                if added.is_empty() {
                    Transition::Unchanged
                } else {
                    let affected = ongoing.affected.union(&added).copied().collect();
                    Transition::Extended {
                        id: ongoing.id,
                        added,
                        affected,
                    }
                }
            }
            (Some(ongoing), false) => Transition::Closed {
                id: ongoing.id,
                started_at: ongoing.started_at,
                ended_at: snapshot.scanned_at,
                duration: snapshot.scanned_at - ongoing.started_at,
            },
            (None, false) => Transition::Unchanged,
        };

        Ok(Evaluation {
            scanned_at: snapshot.scanned_at,
            total,
            offline,
            outage_condition,
            transition,
        })
    }

    /// Apply an evaluation once its effects are persisted.
    ///
    /// `outage_id` is the store id of an outage opened by this evaluation.
    pub fn commit(
        &mut self,
        evaluation: &Evaluation,
        outage_id: Option<i64>,
    ) -> Result<(), DetectorError> {
        self.check_order(evaluation.scanned_at)?;

        match &evaluation.transition {
            Transition::Unchanged => {}
            Transition::Opened {
                started_at,
                affected,
            } => {
                let mut outage = OutageState::opened(*started_at, affected.clone());
                outage.id = outage_id.unwrap_or_default();
                self.current = Some(outage);
            }
            Transition::Extended { affected, .. } => {
                if let Some(ongoing) = self.current.as_mut() {
                    ongoing.affected = affected.clone();
                }
            }
            Transition::Closed { .. } => {
                self.current = None;
            }
        }

        self.last_scan = Some(evaluation.scanned_at);
        Ok(())
    }

    fn check_order(&self, scanned_at: DateTime<Utc>) -> Result<(), DetectorError> {
        match self.last_scan {
            Some(last_scan) if scanned_at <= last_scan => Err(DetectorError::OutOfOrder {
                scanned_at,
                last_scan,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Checkpoint;
    use crate::probe::ProbeResult;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::BTreeSet;
    use std::time::Duration;

    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 3;
    const D: i64 = 4;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn snapshot(at: DateTime<Utc>, fleet: &[i64], down: &[i64]) -> FleetSnapshot {
        let results = fleet
            .iter()
            .map(|&id| {
                let cp = Checkpoint {
                    id,
                    name: format!("switch-{}", id),
                    ..Default::default()
                };
                if down.contains(&id) {
                    ProbeResult::unreachable(&cp, "timeout")
                } else {
                    ProbeResult::reachable(&cp, Duration::from_millis(3), 200)
                }
            })
            .collect();
        FleetSnapshot::new(at, results)
    }

    fn step(detector: &mut OutageDetector, snap: &FleetSnapshot, id: i64) -> Transition {
        let evaluation = detector.evaluate(snap).unwrap();
        detector.commit(&evaluation, Some(id)).unwrap();
        evaluation.transition
    }

    #[test]
    fn test_threshold_boundary() {
        let detector = OutageDetector::new(0.5);
        assert_eq!(detector.required_offline(4), 2);
        assert!(detector.outage_condition(2, 4));
        assert!(!detector.outage_condition(1, 4));
        assert_eq!(detector.required_offline(5), 3);
        assert!(!detector.outage_condition(2, 5));
    }

    #[test]
    fn test_threshold_float_noise() {
        let detector = OutageDetector::new(0.1);
        assert_eq!(detector.required_offline(30), 3);
    }

    #[test]
    fn test_empty_fleet_never_opens() {
        let detector = OutageDetector::new(0.5);
        assert!(!detector.outage_condition(0, 0));

        let evaluation = detector.evaluate(&snapshot(t(1), &[], &[])).unwrap();
        assert!(!evaluation.outage_condition);
        assert_eq!(evaluation.transition, Transition::Unchanged);
    }

    #[test]
    fn test_single_offline_of_four_is_not_an_outage() {
        let mut detector = OutageDetector::new(0.5);
        let transition = step(&mut detector, &snapshot(t(1), &[A, B, C, D], &[A]), 1);
        assert_eq!(transition, Transition::Unchanged);
        assert!(detector.current().is_none());
    }

    #[test]
    fn test_outage_lifecycle() {
        let mut detector = OutageDetector::new(0.5);
        let fleet = [A, B, C, D];

        let opened = step(&mut detector, &snapshot(t(1), &fleet, &[A, B, C]), 7);
        assert_eq!(
            opened,
            Transition::Opened {
                started_at: t(1),
                affected: BTreeSet::from([A, B, C]),
            }
        );
        let ongoing = detector.current().unwrap();
        assert_eq!(ongoing.id, 7);
        assert_eq!(ongoing.started_at, t(1));
        assert!(ongoing.is_ongoing);

        let extended = step(&mut detector, &snapshot(t(2), &fleet, &[A, B, C, D]), 99);
        assert_eq!(
            extended,
            Transition::Extended {
                id: 7,
                added: BTreeSet::from([D]),
                affected: BTreeSet::from([A, B, C, D]),
            }
        );
        let ongoing = detector.current().unwrap();
        assert_eq!(ongoing.id, 7);
        assert_eq!(ongoing.started_at, t(1));
        assert_eq!(ongoing.affected, BTreeSet::from([A, B, C, D]));

        let closed = step(&mut detector, &snapshot(t(3), &fleet, &[]), 99);
        assert_eq!(
            closed,
            Transition::Closed {
                id: 7,
                started_at: t(1),
                ended_at: t(3),
                duration: ChronoDuration::minutes(2),
            }
        );
        assert!(detector.current().is_none());
    }

    #[test]
    fn test_recovered_checkpoints_stay_affected() {
        let mut detector = OutageDetector::new(0.5);
        let fleet = [A, B, C, D];

        step(&mut detector, &snapshot(t(1), &fleet, &[A, B]), 1);
        let transition = step(&mut detector, &snapshot(t(2), &fleet, &[C, D]), 1);
        assert_eq!(
            transition,
            Transition::Extended {
                id: 1,
                added: BTreeSet::from([C, D]),
                affected: BTreeSet::from([A, B, C, D]),
            }
        );
    }

    #[test]
    fn test_oscillation_produces_separate_outages() {
        let mut detector = OutageDetector::new(0.5);
        let fleet = [A, B];

        let mut opened = 0;
        let mut closed = 0;
        for minute in 1..=6 {
            let down: &[i64] = if minute % 2 == 1 { &[A] } else { &[] };
            match step(&mut detector, &snapshot(t(minute), &fleet, down), minute as i64) {
                Transition::Opened { .. } => opened += 1,
                Transition::Closed { .. } => closed += 1,
                _ => {}
            }
        }
        assert_eq!(opened, 3);
        assert_eq!(closed, 3);
    }

    #[test]
    fn test_rejects_duplicate_and_out_of_order_snapshots() {
        let mut detector = OutageDetector::new(0.5);
        let snap = snapshot(t(5), &[A, B], &[A, B]);
        step(&mut detector, &snap, 1);

        let duplicate = detector.evaluate(&snap);
        assert_eq!(
            duplicate,
            Err(DetectorError::OutOfOrder {
                scanned_at: t(5),
                last_scan: t(5),
            })
        );
        assert!(detector.evaluate(&snapshot(t(4), &[A, B], &[])).is_err());
        assert_eq!(detector.current().unwrap().id, 1);
    }

    #[test]
    fn test_uncommitted_evaluation_leaves_state_untouched() {
        let mut detector = OutageDetector::new(0.5);
        let first = detector.evaluate(&snapshot(t(1), &[A, B], &[A])).unwrap();
        assert!(matches!(first.transition, Transition::Opened { .. }));
        assert!(detector.current().is_none());
        assert!(detector.last_scan().is_none());

        // A later evaluation starts from the same baseline.
        let retry = detector.evaluate(&snapshot(t(2), &[A, B], &[A])).unwrap();
        assert!(matches!(retry.transition, Transition::Opened { started_at, .. } if started_at == t(2)));

        // An evaluation overtaken by a newer commit cannot be applied.
        detector.commit(&retry, Some(3)).unwrap();
        assert!(detector.commit(&first, Some(2)).is_err());
        assert_eq!(detector.current().unwrap().id, 3);
    }

    #[test]
    fn test_resume_from_persisted_outage() {
        let ongoing = OutageState {
            id: 42,
            ..OutageState::opened(t(10), BTreeSet::from([A, B]))
        };
        let mut detector = OutageDetector::resume(0.5, Some(ongoing), Some(t(12)));
        assert_eq!(detector.last_scan(), Some(t(12)));
        assert!(detector.evaluate(&snapshot(t(11), &[A, B], &[])).is_err());

        let transition = step(&mut detector, &snapshot(t(13), &[A, B], &[]), 0);
        assert_eq!(
            transition,
            Transition::Closed {
                id: 42,
                started_at: t(10),
                ended_at: t(13),
                duration: ChronoDuration::minutes(3),
            }
        );
    }

    #[test]
    fn test_resume_ignores_closed_outage() {
        let mut closed = OutageState::opened(t(1), BTreeSet::from([A]));
        closed.is_ongoing = false;
        closed.ended_at = Some(t(2));
        let detector = OutageDetector::resume(0.5, Some(closed), None);
        assert!(detector.current().is_none());
        assert!(detector.last_scan().is_none());
    }
}
