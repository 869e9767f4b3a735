// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stale gap expiration
//!
//! Gaps that collected no ids for longer than `stale_gap_time` are presumed
//! permanently empty (the owning transaction rolled back, or the id was
//! skipped by the sequence). The frontier gap is never a candidate.
//!
//! When the router drained its whole backlog this cycle, every stale gap is
//! retired. Otherwise a writer may still be landing ids the router has not
//! read yet, so a rate-limited busy probe checks each stale gap in ascending
//! order and stops at the first one that already holds ids.

use crate::config::DetectorConfig;
use crate::context::{ContextKey, ContextStore};
use crate::gap::Gap;
use crate::store::GapStore;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// What the busy-channel probe did this pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Router drained everything, or nothing was stale
    #[default]
    NotNeeded,
    /// Last probe ran too recently; nothing expired
    Deferred,
    /// Every stale gap was probed empty
    Clear,
    /// Ids found in this gap; it and every later gap were kept
    Busy(Gap),
}

/// Gaps to retire, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirePlan {
    pub expired: Vec<Gap>,
    pub stale: usize,
    pub probe: ProbeOutcome,
}

impl ExpirePlan {
    fn untouched(stale: usize, probe: ProbeOutcome) -> Self {
        Self {
            expired: Vec::new(),
            stale,
            probe,
        }
    }
}

/// Stale gap expirer
#[derive(Debug, Clone, Copy)]
pub struct StaleGapExpirer<'a> {
    config: &'a DetectorConfig,
}

impl<'a> StaleGapExpirer<'a> {
    pub fn new(config: &'a DetectorConfig) -> Self {
        Self { config }
    }

    /// Returns true if `gap` is older than `stale_gap_time` at `now`.
    pub fn is_stale(&self, gap: &Gap, now: DateTime<Utc>) -> bool {
        now - gap.created_at > self.config.stale_gap_time()
    }

    /// Decide which of `candidates` to retire.
    ///
    /// `now` is the staleness reference (see [`crate::clock::resolve_now`]);
    /// `probe_time` is the server time used by the busy-probe rate limiter.
    /// Only the probe bookkeeping is written here; deleting the gaps is left
    /// to the caller.
    pub fn plan<S, C>(
        &self,
        candidates: &[Gap],
        now: DateTime<Utc>,
        probe_time: DateTime<Utc>,
        all_data_read: bool,
        store: &S,
        context: &C,
    ) -> Result<ExpirePlan>
    where
        S: GapStore + ?Sized,
        C: ContextStore + ?Sized,
    {
        let stale: Vec<Gap> = candidates
            .iter()
            .filter(|gap| self.is_stale(gap, now))
            .copied()
            .collect();

        if stale.is_empty() {
            return Ok(ExpirePlan::untouched(0, ProbeOutcome::NotNeeded));
        }

        if all_data_read {
            return Ok(ExpirePlan {
                stale: stale.len(),
                expired: stale,
                probe: ProbeOutcome::NotNeeded,
            });
        }

        let last_run = context.timestamp(ContextKey::LastBusyExpireRun)?;
        let due = match last_run {
            Some(last) => probe_time - last >= self.config.stale_gap_busy_expire_time(),
            None => true,
        };
        if !due {
            tracing::debug!(
                stale = stale.len(),
                "Busy probe ran recently, deferring stale gaps"
            );
            return Ok(ExpirePlan::untouched(stale.len(), ProbeOutcome::Deferred));
        }

        let mut expired = Vec::with_capacity(stale.len());
        let mut probe = ProbeOutcome::Clear;
        for gap in &stale {
            let count = store.count_existing_ids(gap.start_id, gap.end_id)?;
            if count > 0 {
                tracing::debug!(
                    start_id = gap.start_id,
                    end_id = gap.end_id,
                    count,
                    "Channel busy, stopping expiration"
                );
                probe = ProbeOutcome::Busy(*gap);
                break;
            }
            expired.push(*gap);
        }

        context.set_timestamp(ContextKey::LastBusyExpireRun, probe_time)?;

        Ok(ExpirePlan {
            expired,
            stale: stale.len(),
            probe,
        })
    }
}
