// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared context state
//!
//! Small persisted key/value state shared by every process routing the same
//! node: the full-analysis toggle and the busy-probe bookkeeping.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Keys of the shared context state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// Re-verify every gap against the store each cycle
    FullGapAnalysis,
    /// Last time the busy-channel probe ran
    LastBusyExpireRun,
}

impl ContextKey {
    /// Persisted name of the key
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKey::FullGapAnalysis => "routing.full.gap.analysis",
            ContextKey::LastBusyExpireRun => "routing.last.busy.expire.run.time",
        }
    }
}

/// Context store trait
pub trait ContextStore {
    /// Read a boolean flag (unset reads as `false`)
    fn flag(&self, key: ContextKey) -> Result<bool>;

    /// Write a boolean flag
    fn set_flag(&self, key: ContextKey, value: bool) -> Result<()>;

    /// Read a timestamp (unset reads as `None`)
    fn timestamp(&self, key: ContextKey) -> Result<Option<DateTime<Utc>>>;

    /// Write a timestamp
    fn set_timestamp(&self, key: ContextKey, value: DateTime<Utc>) -> Result<()>;
}

impl<T: ContextStore + ?Sized> ContextStore for Arc<T> {
    fn flag(&self, key: ContextKey) -> Result<bool> {
        (**self).flag(key)
    }

    fn set_flag(&self, key: ContextKey, value: bool) -> Result<()> {
        (**self).set_flag(key, value)
    }

    fn timestamp(&self, key: ContextKey) -> Result<Option<DateTime<Utc>>> {
        (**self).timestamp(key)
    }

    fn set_timestamp(&self, key: ContextKey, value: DateTime<Utc>) -> Result<()> {
        (**self).set_timestamp(key, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextValue {
    Flag(bool),
    Timestamp(DateTime<Utc>),
}

/// In-process context store (for testing)
#[derive(Debug, Default)]
pub struct MemoryContext {
    values: Mutex<HashMap<ContextKey, ContextValue>>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for MemoryContext {
    fn flag(&self, key: ContextKey) -> Result<bool> {
        Ok(matches!(
            self.values.lock().get(&key),
            Some(ContextValue::Flag(true))
        ))
    }

    fn set_flag(&self, key: ContextKey, value: bool) -> Result<()> {
        self.values.lock().insert(key, ContextValue::Flag(value));
        Ok(())
    }

    fn timestamp(&self, key: ContextKey) -> Result<Option<DateTime<Utc>>> {
        Ok(match self.values.lock().get(&key) {
            Some(ContextValue::Timestamp(ts)) => Some(*ts),
            _ => None,
        })
    }

    fn set_timestamp(&self, key: ContextKey, value: DateTime<Utc>) -> Result<()> {
        self.values
            .lock()
            .insert(key, ContextValue::Timestamp(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_context_defaults() {
        let context = MemoryContext::new();
        assert!(!context.flag(ContextKey::FullGapAnalysis).unwrap());
        assert!(context
            .timestamp(ContextKey::LastBusyExpireRun)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_memory_context_set() {
        let context = MemoryContext::new();
        let now = Utc::now();

        context.set_flag(ContextKey::FullGapAnalysis, true).unwrap();
        context
            .set_timestamp(ContextKey::LastBusyExpireRun, now)
            .unwrap();

        assert!(context.flag(ContextKey::FullGapAnalysis).unwrap());
        assert_eq!(
            context.timestamp(ContextKey::LastBusyExpireRun).unwrap(),
            Some(now)
        );
    }

    #[test]
    fn test_key_names() {
        assert_eq!(
            ContextKey::FullGapAnalysis.as_str(),
            "routing.full.gap.analysis"
        );
        assert_eq!(
            ContextKey::LastBusyExpireRun.as_str(),
            "routing.last.busy.expire.run.time"
        );
    }
}
