// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap reconciliation
//!
//! Given a validated snapshot and a source of observed change-ids, computes the
//! deletes and inserts that bring the persisted gap set up to date. The
//! computation touches no store state besides what the [`IdSource`] reads; the
//! caller decides when and how the resulting [`ReconcilePlan`] is applied.
//!
//! For every gap with observed ids `o1 < ... < on`:
//!
//! ```text
//! [start ............................................ end]     bounded gap
//! [start, o1-1]  o1  [o1+1, o2-1]  o2  ...  on  [on+1, end]    replacement
//!
//! [start ............................................ cap]     frontier gap
//! [start, o1-1]  o1  ...  on  [on+1, on+max_gap_size]          replacement
//! ```
//!
//! The frontier replacement is kept apart from the change set because it is
//! committed on its own.

use crate::config::DetectorConfig;
use crate::gap::{Gap, GapKind, GapSnapshot};
use crate::store::{GapChangeSet, GapStore};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Supplies the observed ids falling inside a gap.
///
/// Gaps are requested in ascending order, which lets cursor based sources walk
/// their ids once.
pub trait IdSource {
    /// Observed ids inside `gap`, ascending and without duplicates
    fn ids_in(&mut self, gap: &Gap) -> Result<Vec<i64>>;
}

/// Router-supplied ids, walked with a forward cursor.
#[derive(Debug)]
pub struct ObservedIds<'a> {
    ids: &'a [i64],
    cursor: usize,
}

impl<'a> ObservedIds<'a> {
    /// `ids` must be ascending without duplicates.
    pub fn from_sorted(ids: &'a [i64]) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Self { ids, cursor: 0 }
    }
}

impl IdSource for ObservedIds<'_> {
    fn ids_in(&mut self, gap: &Gap) -> Result<Vec<i64>> {
        while self.cursor < self.ids.len() && self.ids[self.cursor] < gap.start_id {
            self.cursor += 1;
        }
        let begin = self.cursor;
        while self.cursor < self.ids.len() && self.ids[self.cursor] <= gap.end_id {
            self.cursor += 1;
        }
        Ok(self.ids[begin..self.cursor].to_vec())
    }
}

/// Ids read straight from the change log (full-analysis mode).
pub struct StoreIds<'a, S: GapStore + ?Sized> {
    store: &'a S,
    queries: usize,
}

impl<'a, S: GapStore + ?Sized> StoreIds<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, queries: 0 }
    }

    /// Number of range queries issued so far
    pub fn queries(&self) -> usize {
        self.queries
    }
}

impl<S: GapStore + ?Sized> IdSource for StoreIds<'_, S> {
    fn ids_in(&mut self, gap: &Gap) -> Result<Vec<i64>> {
        self.queries += 1;
        let mut ids = self.store.query_existing_ids(gap.start_id, gap.end_id)?;
        ids.retain(|id| gap.contains(*id));
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Deletes and split inserts, applied in one transaction
    pub changes: GapChangeSet,

    /// New frontier gap, committed on its own after `changes`
    pub frontier: Option<Gap>,

    /// Bounded gaps without observed ids, ascending
    pub expire_candidates: Vec<Gap>,

    /// Observed ids that fell inside some gap
    pub matched_ids: usize,
}

impl ReconcilePlan {
    /// Returns true if applying the plan writes nothing.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.frontier.is_none()
    }
}

/// Reconcile `snapshot` against the ids supplied by `ids`.
///
/// New gaps are stamped with `now`.
pub fn reconcile<I: IdSource + ?Sized>(
    snapshot: &GapSnapshot,
    ids: &mut I,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> Result<ReconcilePlan> {
    let mut plan = ReconcilePlan::default();

    for (kind, gap) in snapshot.iter() {
        let hits = ids.ids_in(gap)?;
        let (first, last) = match (hits.first(), hits.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                if kind == GapKind::Bounded {
                    plan.expire_candidates.push(*gap);
                }
                continue;
            }
        };

        plan.matched_ids += hits.len();
        plan.changes.delete(*gap);

        if first > gap.start_id {
            push_gap(&mut plan.changes, Gap::new(gap.start_id, first - 1, now), config);
        }

        for pair in hits.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next > prev.saturating_add(config.id_increment) {
                push_gap(&mut plan.changes, Gap::new(prev + 1, next - 1, now), config);
            }
        }

        match kind {
            GapKind::Bounded => {
                if last < gap.end_id {
                    push_gap(&mut plan.changes, Gap::new(last + 1, gap.end_id, now), config);
                }
            }
            GapKind::Frontier => {
                if let Some(start) = last.checked_add(1) {
                    let end = last.saturating_add(config.max_gap_size);
                    plan.frontier = Some(Gap::new(start, end, now));
                }
            }
        }

        tracing::trace!(
            start_id = gap.start_id,
            end_id = gap.end_id,
            hits = hits.len(),
            "Gap consumed"
        );
    }

    Ok(plan)
}

fn push_gap(changes: &mut GapChangeSet, gap: Gap, config: &DetectorConfig) {
    if config.is_suspicious_size(gap.size()) {
        tracing::warn!(
            start_id = gap.start_id,
            end_id = gap.end_id,
            size = gap.size(),
            "Inserting a very large gap, likely a miscalculation"
        );
    }
    changes.insert(gap);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(start: i64, end: i64) -> Gap {
        Gap::new(start, end, DateTime::<Utc>::UNIX_EPOCH)
    }

    fn snapshot(ranges: &[(i64, i64)]) -> GapSnapshot {
        GapSnapshot::new(ranges.iter().map(|(s, e)| gap(*s, *e)).collect()).unwrap()
    }

    fn run(ranges: &[(i64, i64)], ids: &[i64]) -> ReconcilePlan {
        let config = DetectorConfig::default();
        let mut source = ObservedIds::from_sorted(ids);
        reconcile(&snapshot(ranges), &mut source, &config, Utc::now()).unwrap()
    }

    fn ranges(gaps: &[Gap]) -> Vec<(i64, i64)> {
        gaps.iter().map(Gap::range).collect()
    }

    #[test]
    fn test_new_gap() {
        let plan = run(&[(3, 3), (4, 50_000_004)], &[100]);

        assert_eq!(ranges(&plan.changes.deleted), vec![(4, 50_000_004)]);
        assert_eq!(ranges(&plan.changes.inserted), vec![(4, 99)]);
        assert_eq!(plan.frontier.map(|g| g.range()), Some((101, 50_000_100)));
        assert_eq!(ranges(&plan.expire_candidates), vec![(3, 3)]);
        assert_eq!(plan.matched_ids, 1);
    }

    #[test]
    fn test_two_new_gaps() {
        let plan = run(&[(3, 3), (4, 50_000_004)], &[5, 8]);

        assert_eq!(ranges(&plan.changes.deleted), vec![(4, 50_000_004)]);
        assert_eq!(ranges(&plan.changes.inserted), vec![(4, 4), (6, 7)]);
        assert_eq!(plan.frontier.map(|g| g.range()), Some((9, 50_000_008)));
    }

    #[test]
    fn test_gap_in_gap() {
        let plan = run(
            &[(3, 3), (5, 10), (15, 20), (21, 50_000_020)],
            &[6, 18, 23],
        );

        assert_eq!(
            ranges(&plan.changes.deleted),
            vec![(5, 10), (15, 20), (21, 50_000_020)]
        );
        assert_eq!(
            ranges(&plan.changes.inserted),
            vec![(5, 5), (7, 10), (15, 17), (19, 20), (21, 22)]
        );
        assert_eq!(plan.frontier.map(|g| g.range()), Some((24, 50_000_023)));
        assert_eq!(ranges(&plan.expire_candidates), vec![(3, 3)]);
    }

    #[test]
    fn test_ids_outside_gaps_are_ignored() {
        let plan = run(&[(3, 3), (5, 10), (20, 50_000_019)], &[1, 4, 11, 12]);

        assert!(plan.is_noop());
        assert_eq!(plan.matched_ids, 0);
        assert_eq!(ranges(&plan.expire_candidates), vec![(3, 3), (5, 10)]);
    }

    #[test]
    fn test_fully_consumed_bounded_gap() {
        let plan = run(&[(5, 7), (10, 50_000_009)], &[5, 6, 7]);

        assert_eq!(ranges(&plan.changes.deleted), vec![(5, 7)]);
        assert!(plan.changes.inserted.is_empty());
        assert!(plan.frontier.is_none());
    }

    #[test]
    fn test_frontier_start_observed() {
        let plan = run(&[(841, 842), (845, 50_000_844)], &[845]);

        assert_eq!(ranges(&plan.changes.deleted), vec![(845, 50_000_844)]);
        assert!(plan.changes.inserted.is_empty());
        assert_eq!(plan.frontier.map(|g| g.range()), Some((846, 50_000_845)));
    }

    #[test]
    fn test_suspicious_size_still_written() {
        let plan = run(&[(3, 3), (4, 50_000_003)], &[40_000_004]);

        // 40M wide: inside the warning band, tracked anyway.
        let prefix = gap(4, 40_000_003);
        assert!(DetectorConfig::default().is_suspicious_size(prefix.size()));
        assert_eq!(ranges(&plan.changes.deleted), vec![(4, 50_000_003)]);
        assert_eq!(ranges(&plan.changes.inserted), vec![prefix.range()]);
        assert_eq!(
            plan.frontier.map(|g| g.range()),
            Some((40_000_005, 90_000_004))
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let plan = run(&[], &[1, 2, 3]);
        assert!(plan.is_noop());
        assert!(plan.expire_candidates.is_empty());
    }

    #[test]
    fn test_id_increment_skips_unallocatable_holes() {
        let config = DetectorConfig::builder().id_increment(2).build().unwrap();
        let ids = [11, 13, 19];
        let mut source = ObservedIds::from_sorted(&ids);
        let plan = reconcile(
            &snapshot(&[(11, 30), (40, 50_000_039)]),
            &mut source,
            &config,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(ranges(&plan.changes.inserted), vec![(14, 18), (20, 30)]);
    }

    #[test]
    fn test_frontier_at_id_ceiling() {
        let ids = [i64::MAX];
        let mut source = ObservedIds::from_sorted(&ids);
        let plan = reconcile(
            &snapshot(&[(i64::MAX - 10, i64::MAX)]),
            &mut source,
            &DetectorConfig::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(ranges(&plan.changes.inserted), vec![(i64::MAX - 10, i64::MAX - 1)]);
        assert!(plan.frontier.is_none());
    }

    #[test]
    fn test_new_gaps_are_stamped() {
        let now = Utc::now();
        let ids = [100];
        let mut source = ObservedIds::from_sorted(&ids);
        let plan = reconcile(
            &snapshot(&[(4, 50_000_004)]),
            &mut source,
            &DetectorConfig::default(),
            now,
        )
        .unwrap();

        assert!(plan.changes.inserted.iter().all(|g| g.created_at == now));
        assert_eq!(plan.frontier.map(|g| g.created_at), Some(now));
    }

    #[test]
    fn test_observed_ids_cursor() {
        let ids = [1, 5, 6, 12, 30];
        let mut source = ObservedIds::from_sorted(&ids);

        assert_eq!(source.ids_in(&gap(2, 6)).unwrap(), vec![5, 6]);
        assert_eq!(source.ids_in(&gap(7, 11)).unwrap(), Vec::<i64>::new());
        assert_eq!(source.ids_in(&gap(12, 100)).unwrap(), vec![12, 30]);
    }
}
