//! Configuration for the poll ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Vote coordinator configuration
    pub coordinator: CoordinatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/poll-ledger"),
            service_name: "poll-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            target_file_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Vote coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Pending requests per poll actor before callers wait
    pub mailbox_capacity: usize,

    /// Commit attempts per vote when the chain moved underneath the actor
    pub max_commit_attempts: u32,

    /// Verify a poll's chain when its actor first loads it
    pub verify_on_load: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            max_commit_attempts: 3,
            verify_on_load: true,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("POLL_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(capacity) = std::env::var("POLL_LEDGER_MAILBOX") {
            config.coordinator.mailbox_capacity = capacity
                .parse()
                .map_err(|e| crate::Error::Config(format!("POLL_LEDGER_MAILBOX: {}", e)))?;
        }

        if let Ok(verify) = std::env::var("POLL_LEDGER_VERIFY_ON_LOAD") {
            config.coordinator.verify_on_load = verify
                .parse()
                .map_err(|e| crate::Error::Config(format!("POLL_LEDGER_VERIFY_ON_LOAD: {}", e)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "poll-ledger");
        assert_eq!(config.coordinator.max_commit_attempts, 3);
        assert!(config.coordinator.verify_on_load);
    }

    #[test]
    fn test_partial_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(
            &path,
            "data_dir = \"/var/lib/polls\"\n\n[coordinator]\nmailbox_capacity = 8\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/polls"));
        assert_eq!(config.coordinator.mailbox_capacity, 8);
        assert_eq!(config.coordinator.max_commit_attempts, 3);
        assert_eq!(config.rocksdb.max_background_jobs, 2);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "coordinator = 5").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }

    // One test owns the POLL_LEDGER_* variables so parallel tests never race on them
    #[test]
    fn test_from_env() {
        std::env::set_var("POLL_LEDGER_DATA_DIR", "/srv/polls");
        std::env::set_var("POLL_LEDGER_MAILBOX", "16");
        std::env::set_var("POLL_LEDGER_VERIFY_ON_LOAD", "false");

        let config = Config::from_env().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/polls"));
        assert_eq!(config.coordinator.mailbox_capacity, 16);
        assert!(!config.coordinator.verify_on_load);
        assert_eq!(config.coordinator.max_commit_attempts, 3);

        std::env::set_var("POLL_LEDGER_MAILBOX", "lots");
        assert!(matches!(Config::from_env(), Err(crate::Error::Config(_))));

        std::env::remove_var("POLL_LEDGER_DATA_DIR");
        std::env::remove_var("POLL_LEDGER_MAILBOX");
        std::env::remove_var("POLL_LEDGER_VERIFY_ON_LOAD");

        let config = Config::from_env().unwrap();
        assert_eq!(config.data_dir, Config::default().data_dir);
        assert!(config.coordinator.verify_on_load);
    }
}
