// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap detector
//!
//! Drives one routing cycle at a time:
//!
//! ```text
//! begin_cycle()            load + validate snapshot
//!                          (full mode: verify every gap against the store)
//! add_observed_ids(..)     router reports the ids it read
//! set_all_data_read(..)    router reports whether it drained everything
//! end_cycle()              (full mode: reload snapshot)
//!                          reconcile, expire stale gaps, persist
//! ```
//!
//! A cycle borrows the detector mutably, so cycles never overlap.

use crate::clock::{resolve_now, Clock};
use crate::config::{ConfigError, DetectorConfig};
use crate::context::{ContextKey, ContextStore};
use crate::expire::{ProbeOutcome, StaleGapExpirer};
use crate::gap::{Gap, GapSnapshot, SnapshotError};
use crate::reconcile::{reconcile, ObservedIds, StoreIds};
use crate::stats::DetectorStats;
use crate::store::{GapChangeSet, GapStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Detector errors.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Corrupt gap set: {0}")]
    Corrupt(#[from] SnapshotError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Full-analysis mode was enabled for this cycle
    pub full_analysis: bool,

    /// Gaps in the snapshot reconciled at the end of the cycle
    pub gaps_loaded: usize,

    /// Distinct ids reported by the router
    pub observed_ids: usize,

    /// Observed ids (router or store) that fell inside a gap
    pub matched_ids: usize,

    /// Gaps deleted because ids were found in them
    pub gaps_deleted: usize,

    /// Split remainders and frontier gaps written
    pub gaps_inserted: usize,

    /// Stale gaps retired
    pub gaps_expired: usize,

    /// Frontier gaps written (up to two in full-analysis mode)
    pub frontier_extensions: usize,

    /// Latest frontier gap written
    pub frontier: Option<Gap>,

    /// Busy probe outcome
    pub probe: ProbeOutcome,
}

impl CycleReport {
    /// Returns true if the cycle wrote anything to the gap store.
    pub fn changed(&self) -> bool {
        self.gaps_deleted + self.gaps_inserted + self.gaps_expired > 0
    }
}

/// Gap detector
///
/// # Type Parameters
///
/// - `S` -- Gap store (e.g., `SqliteGapStore`)
/// - `C` -- Shared context state
/// - `K` -- Database clock
pub struct GapDetector<S, C, K> {
    config: DetectorConfig,
    store: S,
    context: C,
    clock: K,
    stats: Arc<DetectorStats>,
}

impl<S: GapStore, C: ContextStore, K: Clock> GapDetector<S, C, K> {
    /// Create a new detector.
    ///
    /// An invalid configuration is rejected here, never per cycle.
    pub fn new(config: DetectorConfig, store: S, context: C, clock: K) -> Result<Self, DetectorError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            context,
            clock,
            stats: Arc::new(DetectorStats::new()),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Shared statistics handle
    pub fn stats(&self) -> Arc<DetectorStats> {
        Arc::clone(&self.stats)
    }

    /// Start a routing cycle.
    ///
    /// In full-analysis mode every gap of the snapshot is checked against the
    /// change log right away and the result is persisted before the router
    /// runs.
    pub fn begin_cycle(&mut self) -> Result<GapCycle<'_, S, C, K>, DetectorError> {
        let mut report = CycleReport::default();
        let started = self.start(&mut report);
        let (snapshot, full_analysis) = match started {
            Ok(started) => started,
            Err(err) => {
                self.stats.record_failure();
                return Err(err);
            }
        };
        report.full_analysis = full_analysis;

        Ok(GapCycle {
            detector: self,
            snapshot,
            full_analysis,
            observed: BTreeSet::new(),
            all_data_read: false,
            report,
        })
    }

    /// Run a whole cycle with ids already collected by the router.
    pub fn run_cycle(
        &mut self,
        ids: impl IntoIterator<Item = i64>,
        all_data_read: bool,
    ) -> Result<CycleReport, DetectorError> {
        let mut cycle = self.begin_cycle()?;
        cycle.add_observed_ids(ids);
        cycle.set_all_data_read(all_data_read);
        cycle.end_cycle()
    }

    fn start(&self, report: &mut CycleReport) -> Result<(GapSnapshot, bool), DetectorError> {
        let full_analysis = self.context.flag(ContextKey::FullGapAnalysis)?;
        let snapshot = self.ensure_frontier(self.load_snapshot()?)?;

        if full_analysis {
            let now = self.clock.server_time()?;
            let mut ids = StoreIds::new(&self.store);
            let plan = reconcile(&snapshot, &mut ids, &self.config, now)?;
            tracing::debug!(
                gaps = snapshot.len(),
                queries = ids.queries(),
                matched = plan.matched_ids,
                "Full gap analysis"
            );
            report.matched_ids += plan.matched_ids;
            self.persist(&plan.changes, plan.frontier, report)?;
        }

        Ok((snapshot, full_analysis))
    }

    fn load_snapshot(&self) -> Result<GapSnapshot, DetectorError> {
        let gaps = self.store.load_gaps()?;
        GapSnapshot::new(gaps).map_err(|err| {
            tracing::error!("Refusing to process gap set: {}", err);
            DetectorError::from(err)
        })
    }

    /// Seed a frontier gap into an empty gap set.
    ///
    /// A non-empty set always has a frontier: its highest gap, whatever its
    /// size.
    fn ensure_frontier(&self, snapshot: GapSnapshot) -> Result<GapSnapshot, DetectorError> {
        if !snapshot.is_empty() {
            return Ok(snapshot);
        }

        let start = self
            .store
            .max_existing_id()?
            .map_or(0, |id| id.saturating_add(1));
        let end = start.saturating_add(self.config.max_gap_size - 1);
        let gap = Gap::new(start, end, self.clock.server_time()?);

        tracing::info!(start_id = start, end_id = end, "Seeding frontier gap into empty gap set");
        self.store.insert_gap(&gap)?;
        self.load_snapshot()
    }

    /// Commit `changes`, then the frontier on its own.
    fn persist(
        &self,
        changes: &GapChangeSet,
        frontier: Option<Gap>,
        report: &mut CycleReport,
    ) -> Result<(), DetectorError> {
        if !changes.is_empty() {
            self.store.apply_changes(changes)?;
        }

        if let Some(frontier) = frontier {
            self.store.insert_gap(&frontier)?;
            tracing::debug!(
                start_id = frontier.start_id,
                end_id = frontier.end_id,
                "Frontier gap extended"
            );
            report.gaps_inserted += 1;
            report.frontier_extensions += 1;
            report.frontier = Some(frontier);
        }

        Ok(())
    }
}

/// One routing cycle in progress.
///
/// Dropping the cycle without calling [`GapCycle::end_cycle`] abandons it;
/// only a full-analysis pass done by `begin_cycle` has been persisted.
pub struct GapCycle<'a, S, C, K> {
    detector: &'a mut GapDetector<S, C, K>,
    snapshot: GapSnapshot,
    full_analysis: bool,
    observed: BTreeSet<i64>,
    all_data_read: bool,
    report: CycleReport,
}

impl<S: GapStore, C: ContextStore, K: Clock> GapCycle<'_, S, C, K> {
    /// Snapshot taken by `begin_cycle`
    pub fn snapshot(&self) -> &GapSnapshot {
        &self.snapshot
    }

    /// Record change-ids read by the router.
    pub fn add_observed_ids(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.observed.extend(ids);
    }

    /// Record whether the router drained every pending change.
    pub fn set_all_data_read(&mut self, all_data_read: bool) {
        self.all_data_read = all_data_read;
    }

    /// Reconcile, expire and persist.
    pub fn end_cycle(mut self) -> Result<CycleReport, DetectorError> {
        match self.finish() {
            Ok(()) => {
                let report = self.report;
                self.detector.stats.record_cycle(&report);
                log_report(&report);
                Ok(report)
            }
            Err(err) => {
                self.detector.stats.record_failure();
                Err(err)
            }
        }
    }

    fn finish(&mut self) -> Result<(), DetectorError> {
        let detector = &*self.detector;
        let config = &detector.config;

        let snapshot = if self.full_analysis {
            detector.load_snapshot()?
        } else {
            std::mem::take(&mut self.snapshot)
        };

        let ids: Vec<i64> = std::mem::take(&mut self.observed).into_iter().collect();
        let now = detector.clock.server_time()?;
        let plan = reconcile(&snapshot, &mut ObservedIds::from_sorted(&ids), config, now)?;

        let stale_now = resolve_now(&detector.clock, config.clock_sync_tolerance())?;
        let expire = StaleGapExpirer::new(config).plan(
            &plan.expire_candidates,
            stale_now,
            now,
            self.all_data_read,
            &detector.store,
            &detector.context,
        )?;

        if let ProbeOutcome::Busy(gap) = expire.probe {
            tracing::warn!(
                start_id = gap.start_id,
                end_id = gap.end_id,
                stale = expire.stale,
                expired = expire.expired.len(),
                "Channel busy, deferring remaining stale gaps"
            );
        }

        let report = &mut self.report;
        report.gaps_loaded = snapshot.len();
        report.observed_ids = ids.len();
        report.matched_ids += plan.matched_ids;
        report.gaps_deleted += plan.changes.deleted.len();
        report.gaps_inserted += plan.changes.inserted.len();
        report.gaps_expired = expire.expired.len();
        report.probe = expire.probe;

        let mut changes = plan.changes;
        for gap in expire.expired {
            tracing::debug!(start_id = gap.start_id, end_id = gap.end_id, "Expiring stale gap");
            changes.delete(gap);
        }

        detector.persist(&changes, plan.frontier, report)
    }
}

fn log_report(report: &CycleReport) {
    if report.changed() {
        tracing::info!(
            full = report.full_analysis,
            gaps = report.gaps_loaded,
            observed = report.observed_ids,
            deleted = report.gaps_deleted,
            inserted = report.gaps_inserted,
            expired = report.gaps_expired,
            "Gap detection complete"
        );
    } else {
        tracing::debug!(
            full = report.full_analysis,
            gaps = report.gaps_loaded,
            observed = report.observed_ids,
            "Gap detection complete, no changes"
        );
    }
}
