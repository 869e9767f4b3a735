// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap detector configuration.
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.
//!
//! ```toml
//! max_gap_size = 50000000
//! stale_gap_time_ms = 60000
//! stale_gap_busy_expire_time_ms = 60000
//! clock_sync_tolerance_ms = 60000
//! id_increment = 1
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Gap detector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Width of the frontier gap, and ceiling for any other gap
    #[serde(default = "default_max_gap_size")]
    pub max_gap_size: i64,

    /// Age after which an empty gap is presumed permanently empty (ms)
    #[serde(default = "default_stale_gap_time_ms")]
    pub stale_gap_time_ms: u64,

    /// Minimum delay between two busy-channel probes (ms)
    #[serde(default = "default_stale_gap_busy_expire_time_ms")]
    pub stale_gap_busy_expire_time_ms: u64,

    /// Subtracted from the oldest open transaction start time (ms)
    #[serde(default = "default_clock_sync_tolerance_ms")]
    pub clock_sync_tolerance_ms: u64,

    /// Step between two allocated change-ids
    #[serde(default = "default_id_increment")]
    pub id_increment: i64,
}

fn default_max_gap_size() -> i64 {
    50_000_000
}

fn default_stale_gap_time_ms() -> u64 {
    60_000
}

fn default_stale_gap_busy_expire_time_ms() -> u64 {
    60_000
}

fn default_clock_sync_tolerance_ms() -> u64 {
    60_000
}

fn default_id_increment() -> i64 {
    1
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_gap_size: default_max_gap_size(),
            stale_gap_time_ms: default_stale_gap_time_ms(),
            stale_gap_busy_expire_time_ms: default_stale_gap_busy_expire_time_ms(),
            clock_sync_tolerance_ms: default_clock_sync_tolerance_ms(),
            id_increment: default_id_increment(),
        }
    }
}

impl DetectorConfig {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_gap_size < 4 {
            return Err(ConfigError::Invalid(format!(
                "max_gap_size must be at least 4 (got {})",
                self.max_gap_size
            )));
        }

        if self.id_increment < 1 {
            return Err(ConfigError::Invalid(format!(
                "id_increment must be positive (got {})",
                self.id_increment
            )));
        }

        if self.stale_gap_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "stale_gap_time_ms must be non-zero".into(),
            ));
        }

        Ok(())
    }

    pub fn stale_gap_time(&self) -> chrono::Duration {
        millis(self.stale_gap_time_ms)
    }

    pub fn stale_gap_busy_expire_time(&self) -> chrono::Duration {
        millis(self.stale_gap_busy_expire_time_ms)
    }

    pub fn clock_sync_tolerance(&self) -> chrono::Duration {
        millis(self.clock_sync_tolerance_ms)
    }

    /// Returns true if a gap of `size` ids falls in the band
    /// `[0.75 * max_gap_size, max_gap_size - 1)`.
    pub fn is_suspicious_size(&self, size: i64) -> bool {
        let lower = self.max_gap_size / 4 * 3 + (self.max_gap_size % 4) * 3 / 4;
        size >= lower && size < self.max_gap_size - 1
    }
}

fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    max_gap_size: Option<i64>,
    stale_gap_time_ms: Option<u64>,
    stale_gap_busy_expire_time_ms: Option<u64>,
    clock_sync_tolerance_ms: Option<u64>,
    id_increment: Option<i64>,
}

impl ConfigBuilder {
    /// Set the frontier gap width
    pub fn max_gap_size(mut self, size: i64) -> Self {
        self.max_gap_size = Some(size);
        self
    }

    /// Set the stale gap age in milliseconds
    pub fn stale_gap_time_ms(mut self, ms: u64) -> Self {
        self.stale_gap_time_ms = Some(ms);
        self
    }

    /// Set the busy probe rate limit in milliseconds
    pub fn stale_gap_busy_expire_time_ms(mut self, ms: u64) -> Self {
        self.stale_gap_busy_expire_time_ms = Some(ms);
        self
    }

    /// Set the clock sync tolerance in milliseconds
    pub fn clock_sync_tolerance_ms(mut self, ms: u64) -> Self {
        self.clock_sync_tolerance_ms = Some(ms);
        self
    }

    /// Set the id allocation step
    pub fn id_increment(mut self, step: i64) -> Self {
        self.id_increment = Some(step);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<DetectorConfig, ConfigError> {
        let defaults = DetectorConfig::default();

        let config = DetectorConfig {
            max_gap_size: self.max_gap_size.unwrap_or(defaults.max_gap_size),
            stale_gap_time_ms: self.stale_gap_time_ms.unwrap_or(defaults.stale_gap_time_ms),
            stale_gap_busy_expire_time_ms: self
                .stale_gap_busy_expire_time_ms
                .unwrap_or(defaults.stale_gap_busy_expire_time_ms),
            clock_sync_tolerance_ms: self
                .clock_sync_tolerance_ms
                .unwrap_or(defaults.clock_sync_tolerance_ms),
            id_increment: self.id_increment.unwrap_or(defaults.id_increment),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = DetectorConfig::default();

        assert_eq!(config.max_gap_size, 50_000_000);
        assert_eq!(config.stale_gap_time_ms, 60_000);
        assert_eq!(config.stale_gap_busy_expire_time_ms, 60_000);
        assert_eq!(config.clock_sync_tolerance_ms, 60_000);
        assert_eq!(config.id_increment, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = DetectorConfig::builder()
            .max_gap_size(1000)
            .stale_gap_time_ms(5_000)
            .id_increment(2)
            .build()
            .unwrap();

        assert_eq!(config.max_gap_size, 1000);
        assert_eq!(config.stale_gap_time_ms, 5_000);
        assert_eq!(config.stale_gap_busy_expire_time_ms, 60_000);
        assert_eq!(config.id_increment, 2);
        assert_eq!(config.stale_gap_time(), chrono::Duration::seconds(5));
    }

    #[test]
    fn test_config_builder_rejects_invalid() {
        assert!(DetectorConfig::builder().max_gap_size(0).build().is_err());
        assert!(DetectorConfig::builder().id_increment(0).build().is_err());
        assert!(DetectorConfig::builder().stale_gap_time_ms(0).build().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_gap_size = 1000\nid_increment = 5").unwrap();

        let config = DetectorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_gap_size, 1000);
        assert_eq!(config.id_increment, 5);
        assert_eq!(config.stale_gap_time_ms, 60_000);
    }

    #[test]
    fn test_config_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id_increment = -1").unwrap();

        let err = DetectorConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = DetectorConfig::builder().max_gap_size(1234).build().unwrap();
        let text = config.to_toml().unwrap();
        let parsed: DetectorConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_suspicious_size_band() {
        let config = DetectorConfig::default();

        assert!(!config.is_suspicious_size(37_499_999));
        assert!(config.is_suspicious_size(37_500_000));
        assert!(config.is_suspicious_size(49_999_998));
        assert!(!config.is_suspicious_size(49_999_999));
        assert!(!config.is_suspicious_size(50_000_000));
        assert!(!config.is_suspicious_size(1));
    }
}
