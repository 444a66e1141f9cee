//! Configuration database settings

use meshcdb_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration database settings.
///
/// Table capacities are fixed for the lifetime of a [`crate::Cdb`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdbConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Root under which all records are stored
    pub settings_root: String,

    /// Maximum number of nodes
    pub node_count: usize,

    /// Maximum number of subnets
    pub subnet_count: usize,

    /// Maximum number of application keys
    pub app_key_count: usize,

    /// Delay between the first pending change and the flush
    pub store_timeout_secs: u64,
}

impl Default for CdbConfig {
    fn default() -> Self {
        Self {
            store_path: meshcdb_common::default_store_path(),
            settings_root: "bt/mesh/cdb".to_string(),
            node_count: 8,
            subnet_count: 1,
            app_key_count: 1,
            store_timeout_secs: 2,
        }
    }
}

impl CdbConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self =
                toml::from_str(&content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject capacities and roots the database cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(Error::InvalidConfig("node_count must be at least 1".into()));
        }
        if self.subnet_count == 0 {
            return Err(Error::InvalidConfig("subnet_count must be at least 1".into()));
        }
        if self.app_key_count == 0 {
            return Err(Error::InvalidConfig("app_key_count must be at least 1".into()));
        }
        let root = self.settings_root.trim_matches('/');
        if root.is_empty() || root != self.settings_root {
            return Err(Error::InvalidConfig(format!(
                "settings_root {:?} must be non-empty without leading or trailing '/'",
                self.settings_root
            )));
        }
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("cdb.db")
    }

    /// Get the store timeout
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CdbConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store_timeout(), Duration::from_secs(2));
        assert!(config.db_path().ends_with("cdb.db"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CdbConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.node_count, 8);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("cdb.toml");

        let config = CdbConfig {
            node_count: 32,
            subnet_count: 4,
            app_key_count: 6,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = CdbConfig::load(&path).unwrap();
        assert_eq!(loaded.node_count, 32);
        assert_eq!(loaded.subnet_count, 4);
        assert_eq!(loaded.app_key_count, 6);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdb.toml");
        std::fs::write(&path, "node_count = 3\n").unwrap();

        let loaded = CdbConfig::load(&path).unwrap();
        assert_eq!(loaded.node_count, 3);
        assert_eq!(loaded.settings_root, "bt/mesh/cdb");
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = CdbConfig {
            node_count: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = CdbConfig {
            settings_root: "/bt/mesh/".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
