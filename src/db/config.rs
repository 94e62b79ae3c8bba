//! Per-database persistence configuration.

use crate::{Result, RowbaseError};
use std::path::PathBuf;
use std::time::Duration;

/// Where and how often one database is snapshotted, and how much history to
/// keep. Validated when registered with the manager.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub database_name: String,
    pub dump_directory: PathBuf,
    pub dump_file_prefix: String,
    pub enable_automatic_snapshots: bool,
    pub snapshot_interval: Duration,
    pub max_snapshot_history: usize,
    pub auto_restore_latest_dump: bool,
}

impl PersistenceConfig {
    pub fn new(database_name: impl Into<String>, dump_directory: impl Into<PathBuf>) -> Self {
        let database_name = database_name.into();
        Self {
            dump_file_prefix: database_name.clone(),
            database_name,
            dump_directory: dump_directory.into(),
            enable_automatic_snapshots: false,
            snapshot_interval: Duration::from_secs(60),
            max_snapshot_history: 5,
            auto_restore_latest_dump: false,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.dump_file_prefix = prefix.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn max_history(mut self, max: usize) -> Self {
        self.max_snapshot_history = max;
        self
    }

    pub fn automatic(mut self, enabled: bool) -> Self {
        self.enable_automatic_snapshots = enabled;
        self
    }

    pub fn auto_restore(mut self, enabled: bool) -> Self {
        self.auto_restore_latest_dump = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_name.trim().is_empty() {
            return Err(RowbaseError::InvalidArgument(
                "persistence config: empty database name".to_string(),
            ));
        }
        if self.dump_file_prefix.trim().is_empty() {
            return Err(RowbaseError::InvalidArgument(
                "persistence config: empty dump file prefix".to_string(),
            ));
        }
        if self.snapshot_interval.is_zero() {
            return Err(RowbaseError::InvalidArgument(
                "persistence config: snapshot interval must be greater than zero".to_string(),
            ));
        }
        if self.max_snapshot_history < 1 {
            return Err(RowbaseError::InvalidArgument(
                "persistence config: max snapshot history must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PersistenceConfig::new("app", "/tmp/dumps");
        assert_eq!(config.dump_file_prefix, "app");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_history() {
        let config = PersistenceConfig::new("app", "/tmp/dumps").interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = PersistenceConfig::new("app", "/tmp/dumps").max_history(0);
        assert!(config.validate().is_err());
    }
}
