// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::unreadable_literal)] // Large test constants

//! SQLite-backed gap detection tests
//!
//! Captures changes with holes, commits some of them late, and checks the
//! persisted gap set after each cycle.

use datagap::{
    ContextKey, ContextStore, DetectorConfig, GapDetector, GapStore, ProbeOutcome, SqliteGapStore,
};
use std::time::Duration;

type Detector = GapDetector<SqliteGapStore, SqliteGapStore, SqliteGapStore>;

fn detector(store: &SqliteGapStore, config: DetectorConfig) -> Detector {
    GapDetector::new(config, store.clone(), store.clone(), store.clone()).unwrap()
}

fn ranges(store: &SqliteGapStore) -> Vec<(i64, i64)> {
    store.load_gaps().unwrap().iter().map(|g| g.range()).collect()
}

/// Minimal router: every existing id inside the current gaps.
fn route(store: &SqliteGapStore) -> Vec<i64> {
    let mut ids = Vec::new();
    for gap in store.load_gaps().unwrap() {
        ids.extend(store.query_existing_ids(gap.start_id, gap.end_id).unwrap());
    }
    ids
}

fn cycle(detector: &mut Detector, store: &SqliteGapStore, all_data_read: bool) -> datagap::CycleReport {
    let mut cycle = detector.begin_cycle().unwrap();
    cycle.add_observed_ids(route(store));
    cycle.set_all_data_read(all_data_read);
    cycle.end_cycle().unwrap()
}

#[test]
fn test_sqlite_late_commit_is_picked_up() {
    let store = SqliteGapStore::new_in_memory().unwrap();
    let mut detector = detector(&store, DetectorConfig::default());

    store.capture("orders", 10, 0).unwrap();
    cycle(&mut detector, &store, true);
    assert_eq!(ranges(&store), vec![(11, 50000010)]);

    // Ids 11 and 12 held by transactions still in flight.
    assert_eq!(store.capture("orders", 5, 2).unwrap(), vec![13, 14, 15, 16, 17]);
    let report = cycle(&mut detector, &store, true);
    assert_eq!(report.observed_ids, 5);
    assert_eq!(ranges(&store), vec![(11, 12), (18, 50000017)]);

    store.insert_data_id(12, "orders").unwrap();
    cycle(&mut detector, &store, true);
    assert_eq!(ranges(&store), vec![(11, 11), (18, 50000017)]);

    store.insert_data_id(11, "orders").unwrap();
    cycle(&mut detector, &store, true);
    assert_eq!(ranges(&store), vec![(18, 50000017)]);

    let stats = detector.stats().snapshot();
    assert_eq!(stats.cycles, 4);
    assert_eq!(stats.failed_cycles, 0);
}

#[test]
fn test_sqlite_full_analysis() {
    let store = SqliteGapStore::new_in_memory().unwrap();
    let mut detector = detector(&store, DetectorConfig::default());

    store.capture("orders", 3, 0).unwrap();
    cycle(&mut detector, &store, true);
    assert_eq!(ranges(&store), vec![(4, 50000003)]);

    store.capture("orders", 2, 1).unwrap();
    store.set_flag(ContextKey::FullGapAnalysis, true).unwrap();

    // Router reports nothing; the store pass finds 5 and 6 on its own.
    let report = detector.run_cycle([], true).unwrap();
    assert!(report.full_analysis);
    assert_eq!(report.matched_ids, 2);
    assert_eq!(ranges(&store), vec![(4, 4), (7, 50000006)]);
}

#[test]
fn test_sqlite_stale_gap_expires() {
    let store = SqliteGapStore::new_in_memory().unwrap();
    let config = DetectorConfig::builder().stale_gap_time_ms(1).build().unwrap();
    let mut detector = detector(&store, config);

    store.capture("orders", 2, 0).unwrap();
    cycle(&mut detector, &store, true);
    store.capture("orders", 2, 1).unwrap();
    cycle(&mut detector, &store, true);
    assert_eq!(ranges(&store), vec![(3, 3), (6, 50000005)]);

    std::thread::sleep(Duration::from_millis(50));
    let report = cycle(&mut detector, &store, true);

    assert_eq!(report.gaps_expired, 1);
    assert_eq!(ranges(&store), vec![(6, 50000005)]);
}

#[test]
fn test_sqlite_busy_channel_keeps_gap() {
    let store = SqliteGapStore::new_in_memory().unwrap();
    let config = DetectorConfig::builder().stale_gap_time_ms(1).build().unwrap();
    let mut detector = detector(&store, config);

    store.capture("orders", 2, 0).unwrap();
    cycle(&mut detector, &store, true);
    store.capture("orders", 2, 1).unwrap();
    cycle(&mut detector, &store, true);
    std::thread::sleep(Duration::from_millis(50));

    // Committed, but not read by the router yet.
    store.insert_data_id(3, "orders").unwrap();
    let report = detector.run_cycle([], false).unwrap();

    assert!(matches!(report.probe, ProbeOutcome::Busy(gap) if gap.range() == (3, 3)));
    assert_eq!(report.gaps_expired, 0);
    assert_eq!(ranges(&store), vec![(3, 3), (6, 50000005)]);
    assert!(store
        .timestamp(ContextKey::LastBusyExpireRun)
        .unwrap()
        .is_some());

    // Probe ran just now: deferred.
    let report = detector.run_cycle([], false).unwrap();
    assert_eq!(report.probe, ProbeOutcome::Deferred);
}

#[test]
fn test_sqlite_empty_database_seeds_frontier() {
    let store = SqliteGapStore::new_in_memory().unwrap();
    let mut detector = detector(&store, DetectorConfig::default());

    let report = detector.run_cycle([], true).unwrap();

    assert!(!report.changed());
    assert_eq!(ranges(&store), vec![(0, 49999999)]);
    assert_eq!(store.gap_count().unwrap(), 1);
}
