//! Host configuration loaded from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{QuestError, QuestResult};

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_quests_dir() -> PathBuf {
    PathBuf::from("quests")
}

fn default_lifecycles_dir() -> PathBuf {
    PathBuf::from("lifecycles")
}

fn default_scheduler_interval_ms() -> u64 {
    1000
}

fn default_unload_grace_secs() -> u64 {
    5
}

fn default_replication_buffer() -> usize {
    256
}

fn default_log_filter() -> String {
    "quest_tracker=info".to_string()
}

/// Quest tracker settings. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestConfig {
    /// Root of the definition files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Quest definitions, relative to `data_dir`
    #[serde(default = "default_quests_dir")]
    pub quests_dir: PathBuf,
    /// Lifecycle definitions, relative to `data_dir`
    #[serde(default = "default_lifecycles_dir")]
    pub lifecycles_dir: PathBuf,
    /// How often availability windows and repeat cadences are checked
    #[serde(default = "default_scheduler_interval_ms")]
    pub scheduler_interval_ms: u64,
    /// Delay before a departed player's state is purged
    #[serde(default = "default_unload_grace_secs")]
    pub unload_grace_secs: u64,
    /// Per-player replication channel capacity
    #[serde(default = "default_replication_buffer")]
    pub replication_buffer: usize,
    /// Default tracing directive, overridable through `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            quests_dir: default_quests_dir(),
            lifecycles_dir: default_lifecycles_dir(),
            scheduler_interval_ms: default_scheduler_interval_ms(),
            unload_grace_secs: default_unload_grace_secs(),
            replication_buffer: default_replication_buffer(),
            log_filter: default_log_filter(),
        }
    }
}

impl QuestConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> QuestResult<Self> {
        let config = Self::read(path)?;
        Self::log_source(path, config.is_some());
        Ok(config.unwrap_or_default())
    }

    /// Read `path` without logging. `None` if the file does not exist, so
    /// callers that set up tracing from the config can report it afterwards.
    pub fn read(path: &Path) -> QuestResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| QuestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| QuestError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(config))
    }

    pub fn log_source(path: &Path, found: bool) {
        if found {
            info!("Loaded config from {:?}", path);
        } else {
            warn!("Config file {:?} not found, using defaults", path);
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn quests_path(&self) -> PathBuf {
        self.data_dir.join(&self.quests_dir)
    }

    pub fn lifecycles_path(&self) -> PathBuf {
        self.data_dir.join(&self.lifecycles_dir)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms.max(1))
    }

    pub fn unload_grace(&self) -> Duration {
        Duration::from_secs(self.unload_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_for_missing_keys() {
        let config = QuestConfig::from_toml("unload_grace_secs = 10").unwrap();
        assert_eq!(config.unload_grace(), Duration::from_secs(10));
        assert_eq!(config.scheduler_interval(), Duration::from_millis(1000));
        assert_eq!(config.quests_path(), PathBuf::from("data/quests"));
        assert_eq!(config.log_filter, "quest_tracker=info");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = QuestConfig::load(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, QuestConfig::default());
    }

    #[test]
    fn test_read_reports_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(QuestConfig::read(&temp_dir.path().join("absent.toml")).unwrap(), None);

        let path = temp_dir.path().join("quest-tracker.toml");
        std::fs::write(&path, "log_filter = \"quest_tracker=debug\"").unwrap();
        let config = QuestConfig::read(&path).unwrap().unwrap();
        assert_eq!(config.log_filter, "quest_tracker=debug");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("quest-tracker.toml");
        std::fs::write(&path, "scheduler_interval_ms = \"fast\"").unwrap();

        let err = QuestConfig::load(&path).unwrap_err();
        assert!(matches!(err, QuestError::Config { .. }));
    }
}
