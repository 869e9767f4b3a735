// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory gap store
//!
//! Keeps gaps and existing change-ids in process memory and records every
//! call in a journal, so tests can assert the exact store interaction of a
//! cycle. Writes are checked the way a database with a unique range index
//! would check them: deleting an unknown gap or inserting an overlapping one
//! fails and rolls back the whole change set.

use crate::gap::Gap;
use crate::store::{GapChangeSet, GapStore};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// One recorded store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCall {
    Load,
    /// Transactional delete
    Delete(i64, i64),
    /// Transactional insert
    Insert(i64, i64),
    /// Immediate-commit insert
    InsertNow(i64, i64),
    Count(i64, i64),
    Query(i64, i64),
    MaxId,
}

#[derive(Debug, Default)]
struct Inner {
    gaps: BTreeMap<(i64, i64), Gap>,
    ids: BTreeSet<i64>,
    journal: Vec<StoreCall>,
    fail_next_apply: bool,
    fail_next_insert: bool,
}

/// In-memory gap store (for testing)
#[derive(Debug, Default)]
pub struct MemoryGapStore {
    inner: Mutex<Inner>,
}

impl MemoryGapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `gaps` (not journaled, not checked)
    pub fn with_gaps(gaps: impl IntoIterator<Item = Gap>) -> Self {
        let store = Self::new();
        store.seed_gaps(gaps);
        store
    }

    /// Add gaps behind the detector's back (not journaled, not checked)
    pub fn seed_gaps(&self, gaps: impl IntoIterator<Item = Gap>) {
        let mut inner = self.inner.lock();
        for gap in gaps {
            inner.gaps.insert(gap.range(), gap);
        }
    }

    /// Mark change-ids as existing in the change log
    pub fn add_existing_ids(&self, ids: impl IntoIterator<Item = i64>) {
        self.inner.lock().ids.extend(ids);
    }

    /// Current gaps, ascending
    pub fn gaps(&self) -> Vec<Gap> {
        self.inner.lock().gaps.values().copied().collect()
    }

    /// Current gap ranges, ascending
    pub fn ranges(&self) -> Vec<(i64, i64)> {
        self.inner.lock().gaps.keys().copied().collect()
    }

    /// Calls recorded since creation or the last [`Self::clear_journal`]
    pub fn journal(&self) -> Vec<StoreCall> {
        self.inner.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.inner.lock().journal.clear();
    }

    /// Make the next [`GapStore::apply_changes`] fail after issuing its writes
    pub fn fail_next_apply(&self) {
        self.inner.lock().fail_next_apply = true;
    }

    /// Make the next [`GapStore::insert_gap`] fail
    pub fn fail_next_insert(&self) {
        self.inner.lock().fail_next_insert = true;
    }
}

fn check_insert(gaps: &BTreeMap<(i64, i64), Gap>, gap: &Gap) -> Result<()> {
    if gap.start_id > gap.end_id {
        bail!("invalid gap range {}", gap);
    }
    if gaps.contains_key(&gap.range()) {
        bail!("duplicate gap {}", gap);
    }
    if let Some(existing) = gaps.values().find(|g| g.overlaps(gap)) {
        bail!("gap {} overlaps {}", gap, existing);
    }
    Ok(())
}

impl GapStore for MemoryGapStore {
    fn load_gaps(&self) -> Result<Vec<Gap>> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::Load);
        Ok(inner.gaps.values().copied().collect())
    }

    fn apply_changes(&self, changes: &GapChangeSet) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut working = inner.gaps.clone();

        for gap in &changes.deleted {
            inner.journal.push(StoreCall::Delete(gap.start_id, gap.end_id));
            if working.remove(&gap.range()).is_none() {
                bail!("delete of non-existent gap {}", gap);
            }
        }
        for gap in &changes.inserted {
            inner.journal.push(StoreCall::Insert(gap.start_id, gap.end_id));
            check_insert(&working, gap)?;
            working.insert(gap.range(), *gap);
        }

        if std::mem::take(&mut inner.fail_next_apply) {
            bail!("injected transaction failure");
        }

        inner.gaps = working;
        Ok(())
    }

    fn insert_gap(&self, gap: &Gap) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::InsertNow(gap.start_id, gap.end_id));
        if std::mem::take(&mut inner.fail_next_insert) {
            bail!("injected insert failure");
        }
        check_insert(&inner.gaps, gap)?;
        inner.gaps.insert(gap.range(), *gap);
        Ok(())
    }

    fn count_existing_ids(&self, start_id: i64, end_id: i64) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::Count(start_id, end_id));
        if start_id > end_id {
            return Ok(0);
        }
        Ok(inner.ids.range(start_id..=end_id).count() as u64)
    }

    fn query_existing_ids(&self, start_id: i64, end_id: i64) -> Result<Vec<i64>> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::Query(start_id, end_id));
        if start_id > end_id {
            return Ok(Vec::new());
        }
        Ok(inner.ids.range(start_id..=end_id).copied().collect())
    }

    fn max_existing_id(&self) -> Result<Option<i64>> {
        let mut inner = self.inner.lock();
        inner.journal.push(StoreCall::MaxId);
        Ok(inner.ids.last().copied())
    }
}
