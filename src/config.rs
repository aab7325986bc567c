//! Engine configuration, read from a TOML file. Every field has a default so a
//! partial (or missing) file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_DATABASE_PATH: &str = "spaced-sync.sqlite3";
pub const DEFAULT_INITIAL_EASE: f64 = 2.5;
pub const DEFAULT_MASTERY_THRESHOLD: u32 = 8;
pub const DEFAULT_HISTORY_CAP: usize = 365;
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 25;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Lower bound on the periodic sync interval.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub scheduler: SchedulerConfig,
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Tuning for the SM-2 scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ease factor given to items on their first review.
    pub initial_ease: f64,
    /// Consecutive successes an item must exceed to count as mastered.
    pub mastery_threshold: u32,
    /// Most recent review timestamps kept per item.
    pub history_cap: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_ease: DEFAULT_INITIAL_EASE,
            mastery_threshold: DEFAULT_MASTERY_THRESHOLD,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

/// Tuning for the sync reconciler and its background worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entries read from the queue per batch.
    pub batch_size: usize,
    /// Seconds between periodic reconciliation passes.
    pub interval_secs: u64,
}

impl SyncConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs.max(MIN_SYNC_INTERVAL_SECS))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}
