// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Detector statistics.

use crate::detector::CycleReport;
use crate::expire::ProbeOutcome;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters accumulated across cycles.
#[derive(Debug)]
pub struct DetectorStats {
    /// Cycles completed
    pub cycles: AtomicU64,

    /// Cycles aborted by an error
    pub failed_cycles: AtomicU64,

    /// Gaps written (split remainders and frontiers)
    pub gaps_inserted: AtomicU64,

    /// Gaps removed because ids were observed in them
    pub gaps_deleted: AtomicU64,

    /// Gaps retired as stale
    pub gaps_expired: AtomicU64,

    /// Frontier gaps written
    pub frontier_extensions: AtomicU64,

    /// Expiration passes stopped by a busy channel
    pub busy_stops: AtomicU64,

    /// Creation time
    pub created: Instant,
}

impl DetectorStats {
    pub fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
            gaps_inserted: AtomicU64::new(0),
            gaps_deleted: AtomicU64::new(0),
            gaps_expired: AtomicU64::new(0),
            frontier_extensions: AtomicU64::new(0),
            busy_stops: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Fold a completed cycle into the counters.
    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.gaps_inserted
            .fetch_add(report.gaps_inserted as u64, Ordering::Relaxed);
        self.gaps_deleted
            .fetch_add(report.gaps_deleted as u64, Ordering::Relaxed);
        self.gaps_expired
            .fetch_add(report.gaps_expired as u64, Ordering::Relaxed);
        self.frontier_extensions
            .fetch_add(report.frontier_extensions as u64, Ordering::Relaxed);
        if matches!(report.probe, ProbeOutcome::Busy(_)) {
            self.busy_stops.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> DetectorStatsSnapshot {
        DetectorStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            gaps_inserted: self.gaps_inserted.load(Ordering::Relaxed),
            gaps_deleted: self.gaps_deleted.load(Ordering::Relaxed),
            gaps_expired: self.gaps_expired.load(Ordering::Relaxed),
            frontier_extensions: self.frontier_extensions.load(Ordering::Relaxed),
            busy_stops: self.busy_stops.load(Ordering::Relaxed),
            uptime: self.created.elapsed(),
        }
    }
}

impl Default for DetectorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`DetectorStats`].
#[derive(Debug, Clone, Serialize)]
pub struct DetectorStatsSnapshot {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub gaps_inserted: u64,
    pub gaps_deleted: u64,
    pub gaps_expired: u64,
    pub frontier_extensions: u64,
    pub busy_stops: u64,
    pub uptime: Duration,
}

impl DetectorStatsSnapshot {
    /// Average cycles per second since creation.
    pub fn cycles_per_sec(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.cycles as f64 / secs
        } else {
            0.0
        }
    }
}
