// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Clock source
//!
//! Gap age is always measured against the database's notion of time, never
//! the detector's local clock.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Clock source trait
pub trait Clock {
    /// Current wall clock time of the database server
    fn server_time(&self) -> Result<DateTime<Utc>>;

    /// Returns true if the database can report its open transactions
    fn supports_transaction_introspection(&self) -> bool;

    /// Start time of the oldest open transaction, if any
    fn earliest_active_transaction_start(&self) -> Result<Option<DateTime<Utc>>>;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn server_time(&self) -> Result<DateTime<Utc>> {
        (**self).server_time()
    }

    fn supports_transaction_introspection(&self) -> bool {
        (**self).supports_transaction_introspection()
    }

    fn earliest_active_transaction_start(&self) -> Result<Option<DateTime<Utc>>> {
        (**self).earliest_active_transaction_start()
    }
}

/// "Now" used to judge gap staleness.
///
/// With transaction introspection this is the oldest open transaction start
/// minus `tolerance`, so a gap is never retired while a transaction that may
/// still fill it is open. Without introspection, or with no open transaction,
/// it is the server time.
pub fn resolve_now<K: Clock + ?Sized>(
    clock: &K,
    tolerance: chrono::Duration,
) -> Result<DateTime<Utc>> {
    if clock.supports_transaction_introspection() {
        if let Some(start) = clock.earliest_active_transaction_start()? {
            return Ok(start - tolerance);
        }
    }
    clock.server_time()
}

/// Manually driven clock (for testing)
#[derive(Debug)]
pub struct ManualClock {
    server_time: Mutex<DateTime<Utc>>,
    introspection: bool,
    earliest_transaction: Mutex<Option<DateTime<Utc>>>,
}

impl ManualClock {
    /// Clock without transaction introspection
    pub fn new(server_time: DateTime<Utc>) -> Self {
        Self {
            server_time: Mutex::new(server_time),
            introspection: false,
            earliest_transaction: Mutex::new(None),
        }
    }

    /// Clock that reports open transactions
    pub fn with_introspection(server_time: DateTime<Utc>) -> Self {
        Self {
            introspection: true,
            ..Self::new(server_time)
        }
    }

    pub fn set_server_time(&self, time: DateTime<Utc>) {
        *self.server_time.lock() = time;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut time = self.server_time.lock();
        *time += by;
    }

    pub fn set_earliest_transaction(&self, start: Option<DateTime<Utc>>) {
        *self.earliest_transaction.lock() = start;
    }
}

impl Clock for ManualClock {
    fn server_time(&self) -> Result<DateTime<Utc>> {
        Ok(*self.server_time.lock())
    }

    fn supports_transaction_introspection(&self) -> bool {
        self.introspection
    }

    fn earliest_active_transaction_start(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.earliest_transaction.lock())
    }
}
