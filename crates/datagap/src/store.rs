// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap store abstraction
//!
//! Defines the trait for gap storage backends (SQLite, in-memory).

use crate::gap::Gap;
use anyhow::Result;
use std::sync::Arc;

/// Deletes and inserts that must land in one transaction.
///
/// Deletes are always applied before inserts so that a gap can be replaced by
/// a sub-range sharing its `start_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapChangeSet {
    /// Gaps to remove
    pub deleted: Vec<Gap>,

    /// Gaps to add
    pub inserted: Vec<Gap>,
}

impl GapChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(&mut self, gap: Gap) {
        self.deleted.push(gap);
    }

    pub fn insert(&mut self, gap: Gap) {
        self.inserted.push(gap);
    }

    /// Returns true if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.inserted.is_empty()
    }
}

/// Gap store trait
///
/// Backend-agnostic access to the persisted gap set and to the change log the
/// gaps describe.
///
/// # Implementations
///
/// - `SqliteGapStore` -- Default, file or in-memory database
/// - `MemoryGapStore` -- In-process store with a call journal (testing)
pub trait GapStore {
    /// Load every persisted gap, ascending by `start_id`
    fn load_gaps(&self) -> Result<Vec<Gap>>;

    /// Apply deletes then inserts inside one store-managed transaction
    ///
    /// Either every change is committed or none is.
    fn apply_changes(&self, changes: &GapChangeSet) -> Result<()>;

    /// Insert a gap with an immediate, independent commit
    fn insert_gap(&self, gap: &Gap) -> Result<()>;

    /// Count existing change-ids in `[start_id, end_id]`
    fn count_existing_ids(&self, start_id: i64, end_id: i64) -> Result<u64>;

    /// Existing change-ids in `[start_id, end_id]`, ascending
    fn query_existing_ids(&self, start_id: i64, end_id: i64) -> Result<Vec<i64>>;

    /// Highest existing change-id, if the change log is not empty
    fn max_existing_id(&self) -> Result<Option<i64>>;
}

impl<T: GapStore + ?Sized> GapStore for Arc<T> {
    fn load_gaps(&self) -> Result<Vec<Gap>> {
        (**self).load_gaps()
    }

    fn apply_changes(&self, changes: &GapChangeSet) -> Result<()> {
        (**self).apply_changes(changes)
    }

    fn insert_gap(&self, gap: &Gap) -> Result<()> {
        (**self).insert_gap(gap)
    }

    fn count_existing_ids(&self, start_id: i64, end_id: i64) -> Result<u64> {
        (**self).count_existing_ids(start_id, end_id)
    }

    fn query_existing_ids(&self, start_id: i64, end_id: i64) -> Result<Vec<i64>> {
        (**self).query_existing_ids(start_id, end_id)
    }

    fn max_existing_id(&self) -> Result<Option<i64>> {
        (**self).max_existing_id()
    }
}
