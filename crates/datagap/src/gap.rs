// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap records and validated gap snapshots.
//!
//! A gap is an inclusive range of change-ids that are not yet known to exist.
//! The persisted gap set is loaded once per cycle into a [`GapSnapshot`], which
//! rejects corrupt input instead of repairing it. The highest gap of a snapshot
//! is the open frontier placeholder and is tagged [`GapKind::Frontier`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Inclusive range of change-ids not yet confirmed to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// First id of the range
    pub start_id: i64,

    /// Last id of the range (inclusive)
    pub end_id: i64,

    /// When the gap was written
    pub created_at: DateTime<Utc>,
}

impl Gap {
    /// Create a new gap
    pub fn new(start_id: i64, end_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            start_id,
            end_id,
            created_at,
        }
    }

    /// Number of ids covered by the gap
    pub fn size(&self) -> i64 {
        self.end_id.saturating_sub(self.start_id).saturating_add(1)
    }

    /// Returns true if `id` falls inside the gap.
    pub fn contains(&self, id: i64) -> bool {
        id >= self.start_id && id <= self.end_id
    }

    /// Returns true if the two ranges share at least one id.
    pub fn overlaps(&self, other: &Gap) -> bool {
        self.start_id <= other.end_id && other.start_id <= self.end_id
    }

    /// `(start_id, end_id)` pair, ignoring the creation time.
    pub fn range(&self) -> (i64, i64) {
        (self.start_id, self.end_id)
    }

    /// Returns true if both gaps cover exactly the same ids.
    pub fn same_range(&self, other: &Gap) -> bool {
        self.range() == other.range()
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_id, self.end_id)
    }
}

/// Role of a gap within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapKind {
    /// Fully bounded historical hole
    Bounded,
    /// Highest gap: placeholder for every id above the highest known id
    Frontier,
}

/// Corrupt gap input. Never repaired, always surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Invalid gap range {0}: start is after end")]
    InvalidRange(Gap),

    #[error("Duplicate gap {0}")]
    Duplicate(Gap),

    #[error("Overlapping gaps {first} and {second}")]
    Overlap { first: Gap, second: Gap },
}

/// Validated, ascending, pairwise disjoint view of the persisted gap set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapSnapshot {
    gaps: Vec<Gap>,
}

impl GapSnapshot {
    /// Validate loaded gaps.
    ///
    /// Gaps are ordered by `start_id`. A gap with `start_id > end_id`, a
    /// duplicate range or any overlap between neighbours is rejected.
    pub fn new(mut gaps: Vec<Gap>) -> Result<Self, SnapshotError> {
        if let Some(bad) = gaps.iter().find(|g| g.start_id > g.end_id) {
            return Err(SnapshotError::InvalidRange(*bad));
        }

        gaps.sort_by_key(Gap::range);

        for pair in gaps.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            if first.same_range(&second) {
                return Err(SnapshotError::Duplicate(second));
            }
            if first.overlaps(&second) {
                return Err(SnapshotError::Overlap { first, second });
            }
        }

        Ok(Self { gaps })
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    /// Gaps paired with their role, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (GapKind, &Gap)> + '_ {
        let last = self.gaps.len().saturating_sub(1);
        self.gaps.iter().enumerate().map(move |(i, gap)| {
            let kind = if i == last {
                GapKind::Frontier
            } else {
                GapKind::Bounded
            };
            (kind, gap)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(start: i64, end: i64) -> Gap {
        Gap::new(start, end, DateTime::<Utc>::UNIX_EPOCH)
    }

    #[test]
    fn test_gap_size_and_contains() {
        let g = gap(5, 10);
        assert_eq!(g.size(), 6);
        assert!(g.contains(5));
        assert!(g.contains(10));
        assert!(!g.contains(11));
        assert_eq!(gap(3, 3).size(), 1);
        assert_eq!(gap(0, i64::MAX).size(), i64::MAX);
    }

    #[test]
    fn test_gap_overlaps() {
        assert!(gap(1, 10).overlaps(&gap(10, 20)));
        assert!(gap(4, 6).overlaps(&gap(1, 10)));
        assert!(!gap(1, 9).overlaps(&gap(10, 20)));
    }

    #[test]
    fn test_snapshot_sorts_and_tags_frontier() {
        let snapshot = GapSnapshot::new(vec![gap(7, 50_000_006), gap(3, 3), gap(5, 6)]).unwrap();

        let kinds: Vec<_> = snapshot.iter().map(|(k, g)| (k, g.range())).collect();
        assert_eq!(
            kinds,
            vec![
                (GapKind::Bounded, (3, 3)),
                (GapKind::Bounded, (5, 6)),
                (GapKind::Frontier, (7, 50_000_006)),
            ]
        );
    }

    #[test]
    fn test_single_gap_is_frontier() {
        let snapshot = GapSnapshot::new(vec![gap(841, 50_000_840)]).unwrap();
        assert_eq!(snapshot.iter().next().map(|(k, _)| k), Some(GapKind::Frontier));

        // Size does not matter
        let snapshot = GapSnapshot::new(vec![gap(3, 3), gap(5, 10)]).unwrap();
        assert_eq!(
            snapshot.iter().last().map(|(k, g)| (k, g.range())),
            Some((GapKind::Frontier, (5, 10)))
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = GapSnapshot::new(Vec::new()).unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.iter().count(), 0);
    }

    #[test]
    fn test_snapshot_rejects_inverted_range() {
        let err = GapSnapshot::new(vec![gap(3, 3), gap(9, 4)]).unwrap_err();
        assert_eq!(err, SnapshotError::InvalidRange(gap(9, 4)));
    }

    #[test]
    fn test_snapshot_rejects_duplicate() {
        let err = GapSnapshot::new(vec![
            gap(31_832_006, 31_832_438),
            gap(31_832_439, 81_832_439),
            gap(31_832_439, 81_832_439),
        ])
        .unwrap_err();
        assert!(matches!(err, SnapshotError::Duplicate(_)));
    }

    #[test]
    fn test_snapshot_rejects_overlap() {
        let err = GapSnapshot::new(vec![
            gap(31_837_983, 81_837_982),
            gap(31_837_983, 81_837_983),
        ])
        .unwrap_err();
        assert!(matches!(err, SnapshotError::Overlap { .. }));

        let err = GapSnapshot::new(vec![gap(30_953_883, 80_953_883), gap(30_953_884, 80_953_883)])
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Overlap { .. }));
    }
}
