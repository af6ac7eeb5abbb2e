//! Configuration file handling for update runs
//!
//! Reads an optional YAML file and layers command-line overrides on top.

use super::error::UpdateError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of concurrent update scripts
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Settings for one update run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of update scripts run concurrently (and of worktrees when committing)
    pub max_workers: usize,
    /// Do not stop after the first failure
    pub keep_going: bool,
    /// Commit the changes reported by update scripts
    pub commit: bool,
    /// Directory receiving `<pname>.log` for failed packages
    pub log_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            keep_going: false,
            commit: false,
            log_dir: PathBuf::from("."),
        }
    }
}

impl RunnerConfig {
    /// Reject settings that cannot produce a run
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.max_workers == 0 {
            return Err(UpdateError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager for the given file
    pub fn new(config_path: &Path) -> Self {
        Self {
            config_path: config_path.to_path_buf(),
        }
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Read config from file, returning defaults if not found
    pub fn read(&self) -> Result<RunnerConfig, UpdateError> {
        if !self.exists() {
            return Ok(RunnerConfig::default());
        }

        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            UpdateError::Config(format!(
                "Failed to read {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            UpdateError::Config(format!(
                "Failed to parse {}: {}",
                self.config_path.display(),
                e
            ))
        })
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

/// Merge config values with command-line overrides
///
/// Flags can only switch behavior on; a flag left off keeps the file's value.
pub fn merge_config(
    file_config: &RunnerConfig,
    max_workers: Option<usize>,
    keep_going: bool,
    commit: bool,
    log_dir: Option<&Path>,
) -> RunnerConfig {
    RunnerConfig {
        max_workers: max_workers.unwrap_or(file_config.max_workers),
        keep_going: keep_going || file_config.keep_going,
        commit: commit || file_config.commit,
        log_dir: log_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| file_config.log_dir.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_read_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(&temp_dir.path().join("batch-updater.yaml"));

        let config = manager.read().unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn test_config_read_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("batch-updater.yaml");
        std::fs::write(&path, "max_workers: 8\ncommit: true\n").unwrap();

        let config = ConfigManager::new(&path).read().unwrap();
        assert_eq!(config.max_workers, 8);
        assert!(config.commit);
        assert!(!config.keep_going);
        assert_eq!(config.log_dir, PathBuf::from("."));
    }

    #[test]
    fn test_config_read_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("batch-updater.yaml");
        std::fs::write(&path, "max_workers: [not, a, number]\n").unwrap();

        let err = ConfigManager::new(&path).read().unwrap_err();
        assert!(matches!(err, UpdateError::Config(_)));
    }

    #[test]
    fn test_merge_config() {
        let file_config = RunnerConfig {
            max_workers: 2,
            keep_going: true,
            commit: false,
            log_dir: PathBuf::from("/var/log/updates"),
        };

        let merged = merge_config(&file_config, Some(6), false, true, None);

        assert_eq!(merged.max_workers, 6); // overridden
        assert!(merged.keep_going); // from file
        assert!(merged.commit); // overridden
        assert_eq!(merged.log_dir, PathBuf::from("/var/log/updates")); // from file
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = RunnerConfig {
            max_workers: 0,
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RunnerConfig::default().validate().is_ok());
    }
}
