// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change-id gap detector
//!
//! Tracks ranges of change-ids that a replication router has not yet seen,
//! so that changes committed late by long-running transactions are still
//! routed once they become visible.
//!
//! # Features
//!
//! - **Gap reconciliation** -- Splits gaps around the ids read each cycle
//! - **Frontier tracking** -- One open-ended gap above the highest known id
//! - **Stale gap expiration** -- Retires gaps that never fill, with a busy probe
//! - **SQLite Backend** -- Gaps, captured changes and context in one database
//!
//! # Architecture
//!
//! ```text
//! GapDetector
//! +-- GapStore       (persisted gap set + change log lookups)
//! +-- ContextStore   (full-analysis flag, busy probe bookkeeping)
//! +-- Clock          (database server time, open transactions)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use datagap::{DetectorConfig, GapDetector, SqliteGapStore};
//!
//! let store = SqliteGapStore::new("datagap.db")?;
//! let mut detector = GapDetector::new(
//!     DetectorConfig::default(),
//!     store.clone(),
//!     store.clone(),
//!     store,
//! )?;
//!
//! let mut cycle = detector.begin_cycle()?;
//! cycle.add_observed_ids([101, 102, 105]);
//! cycle.set_all_data_read(true);
//! let report = cycle.end_cycle()?;
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod detector;
pub mod expire;
pub mod gap;
pub mod memory;
pub mod reconcile;
pub mod sqlite;
pub mod stats;
pub mod store;

pub use clock::{resolve_now, Clock, ManualClock};
pub use config::{ConfigBuilder, ConfigError, DetectorConfig};
pub use context::{ContextKey, ContextStore, MemoryContext};
pub use detector::{CycleReport, DetectorError, GapCycle, GapDetector};
pub use expire::{ExpirePlan, ProbeOutcome, StaleGapExpirer};
pub use gap::{Gap, GapKind, GapSnapshot, SnapshotError};
pub use memory::{MemoryGapStore, StoreCall};
pub use sqlite::SqliteGapStore;
pub use stats::{DetectorStats, DetectorStatsSnapshot};
pub use store::{GapChangeSet, GapStore};
