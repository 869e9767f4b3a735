// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite gap store backend
//!
//! Keeps the captured change log, the gap set and the shared context state in
//! one database, and serves as the database clock.

use crate::clock::Clock;
use crate::context::{ContextKey, ContextStore};
use crate::gap::Gap;
use crate::store::{GapChangeSet, GapStore};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

/// Server time in epoch milliseconds, evaluated by SQLite.
const NOW_MS: &str = "CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)";

/// SQLite gap store
///
/// Cheap to clone; clones share one connection. Thread-safe via internal
/// Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE data (
///     data_id INTEGER PRIMARY KEY,
///     table_name TEXT NOT NULL,
///     created_at INTEGER NOT NULL
/// );
/// CREATE TABLE data_gap (
///     start_id INTEGER NOT NULL,
///     end_id INTEGER NOT NULL,
///     created_at INTEGER NOT NULL,
///     PRIMARY KEY (start_id, end_id)
/// );
/// CREATE TABLE context (
///     name TEXT PRIMARY KEY,
///     value TEXT NOT NULL
/// );
/// ```
///
/// Timestamps are epoch milliseconds.
#[derive(Clone)]
pub struct SqliteGapStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGapStore {
    /// Create a new SQLite store with a file-based database
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS data (
                data_id INTEGER PRIMARY KEY,
                table_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS data_gap (
                start_id INTEGER NOT NULL,
                end_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (start_id, end_id)
            );
            CREATE TABLE IF NOT EXISTS context (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("Failed to create schema")?;

        Ok(())
    }

    /// Append `count` change rows for `table_name`.
    ///
    /// The first `skip` ids after the current highest id are left unused, as if
    /// held by transactions that have not committed yet. Returns the ids
    /// written.
    pub fn capture(&self, table_name: &str, count: usize, skip: usize) -> Result<Vec<i64>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let max: Option<i64> = tx.query_row("SELECT MAX(data_id) FROM data", [], |row| row.get(0))?;
        let first = max.map_or(1, |id| id + 1) + skip as i64;

        let mut ids = Vec::with_capacity(count);
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO data (data_id, table_name, created_at) VALUES (?1, ?2, {})",
                NOW_MS
            ))?;
            for id in first..first + count as i64 {
                insert.execute(params![id, table_name])?;
                ids.push(id);
            }
        }
        tx.commit()?;

        tracing::debug!(table = table_name, count, skip, "Captured changes");
        Ok(ids)
    }

    /// Write one change row with an explicit id (a late commit).
    pub fn insert_data_id(&self, data_id: i64, table_name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO data (data_id, table_name, created_at) VALUES (?1, ?2, {})",
                NOW_MS
            ),
            params![data_id, table_name],
        )
        .with_context(|| format!("Failed to insert change {}", data_id))?;
        Ok(())
    }

    /// Number of persisted gaps
    pub fn gap_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM data_gap", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn read_context(&self, key: ContextKey) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM context WHERE name = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write_context(&self, key: ContextKey, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO context (name, value) VALUES (?1, ?2)",
            params![key.as_str(), value],
        )?;
        Ok(())
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .with_context(|| format!("Timestamp {} out of range", ms))
}

impl GapStore for SqliteGapStore {
    fn load_gaps(&self) -> Result<Vec<Gap>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT start_id, end_id, created_at FROM data_gap ORDER BY start_id, end_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(start, end, created)| -> Result<Gap> {
                Ok(Gap::new(start, end, from_millis(created)?))
            })
            .collect()
    }

    fn apply_changes(&self, changes: &GapChangeSet) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut delete =
                tx.prepare("DELETE FROM data_gap WHERE start_id = ?1 AND end_id = ?2")?;
            for gap in &changes.deleted {
                if delete.execute(params![gap.start_id, gap.end_id])? == 0 {
                    bail!("Gap {} not found", gap);
                }
            }

            let mut insert = tx.prepare(
                "INSERT INTO data_gap (start_id, end_id, created_at) VALUES (?1, ?2, ?3)",
            )?;
            for gap in &changes.inserted {
                insert
                    .execute(params![
                        gap.start_id,
                        gap.end_id,
                        gap.created_at.timestamp_millis()
                    ])
                    .with_context(|| format!("Failed to insert gap {}", gap))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_gap(&self, gap: &Gap) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO data_gap (start_id, end_id, created_at) VALUES (?1, ?2, ?3)",
            params![gap.start_id, gap.end_id, gap.created_at.timestamp_millis()],
        )
        .with_context(|| format!("Failed to insert gap {}", gap))?;
        Ok(())
    }

    fn count_existing_ids(&self, start_id: i64, end_id: i64) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM data WHERE data_id BETWEEN ?1 AND ?2",
            params![start_id, end_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn query_existing_ids(&self, start_id: i64, end_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data_id FROM data WHERE data_id BETWEEN ?1 AND ?2 ORDER BY data_id",
        )?;
        let ids = stmt
            .query_map(params![start_id, end_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn max_existing_id(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let max = conn.query_row("SELECT MAX(data_id) FROM data", [], |row| row.get(0))?;
        Ok(max)
    }
}

impl ContextStore for SqliteGapStore {
    fn flag(&self, key: ContextKey) -> Result<bool> {
        Ok(self.read_context(key)?.as_deref() == Some("true"))
    }

    fn set_flag(&self, key: ContextKey, value: bool) -> Result<()> {
        self.write_context(key, if value { "true" } else { "false" })
    }

    fn timestamp(&self, key: ContextKey) -> Result<Option<DateTime<Utc>>> {
        match self.read_context(key)? {
            Some(value) => {
                let ms: i64 = value
                    .parse()
                    .with_context(|| format!("Invalid timestamp for {}: {}", key.as_str(), value))?;
                Ok(Some(from_millis(ms)?))
            }
            None => Ok(None),
        }
    }

    fn set_timestamp(&self, key: ContextKey, value: DateTime<Utc>) -> Result<()> {
        self.write_context(key, &value.timestamp_millis().to_string())
    }
}

impl Clock for SqliteGapStore {
    fn server_time(&self) -> Result<DateTime<Utc>> {
        let conn = self.conn.lock();
        let ms: i64 = conn.query_row(&format!("SELECT {}", NOW_MS), [], |row| row.get(0))?;
        from_millis(ms)
    }

    fn supports_transaction_introspection(&self) -> bool {
        false
    }

    fn earliest_active_transaction_start(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}
