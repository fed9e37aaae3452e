use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use weft_log::LogOptions;
use weft_sync::SyncConfig;

use crate::error::{DbError, DbResult};

/// Settings shared by a node and the databases it opens.
///
/// Missing keys in a TOML file fall back to the defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum traversal distance for skip-list references on append.
    pub references_count: usize,
    /// Number of entries kept in the in-memory cache per database.
    pub entry_cache_size: usize,
    pub fetch_timeout_ms: u64,
    pub retry_interval_ms: u64,
    /// Start replicating as soon as a database is opened.
    pub sync_automatically: bool,
    /// Capacity of the log, sync, and database event channels.
    pub channel_capacity: usize,
    /// Root for file-backed blocks and heads. In memory when unset.
    pub directory: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            references_count: 16,
            entry_cache_size: 1000,
            fetch_timeout_ms: 30_000,
            retry_interval_ms: 5_000,
            sync_automatically: true,
            channel_capacity: 1024,
            directory: None,
        }
    }
}

impl DatabaseConfig {
    /// Short timeouts for fast test execution.
    pub fn test_config() -> Self {
        Self {
            fetch_timeout_ms: 500,
            retry_interval_ms: 50,
            channel_capacity: 256,
            ..Self::default()
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn from_toml_str(s: &str) -> DbResult<Self> {
        toml::from_str(s).map_err(|e| DbError::Config {
            path: None,
            reason: e.to_string(),
        })
    }

    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| DbError::Config {
            path: Some(path.to_path_buf()),
            reason: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> DbResult<String> {
        toml::to_string_pretty(self).map_err(|e| DbError::Config {
            path: None,
            reason: e.to_string(),
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            retry_interval: self.retry_interval(),
            fetch_timeout: self.fetch_timeout(),
            channel_capacity: self.channel_capacity,
            ..SyncConfig::default()
        }
    }

    /// Log options for the log with id `id`.
    pub fn log_options(&self, id: impl Into<String>) -> LogOptions {
        LogOptions {
            id: Some(id.into()),
            references_count: self.references_count,
            channel_capacity: self.channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DatabaseConfig::default();
        assert_eq!(c.references_count, 16);
        assert_eq!(c.entry_cache_size, 1000);
        assert_eq!(c.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(c.retry_interval(), Duration::from_secs(5));
        assert!(c.sync_automatically);
        assert_eq!(c.channel_capacity, 1024);
        assert!(c.directory.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = DatabaseConfig::from_toml_str(
            r#"
            references_count = 4
            sync_automatically = false
            directory = "/var/lib/weft"
            "#,
        )
        .unwrap();
        assert_eq!(c.references_count, 4);
        assert!(!c.sync_automatically);
        assert_eq!(c.directory, Some(PathBuf::from("/var/lib/weft")));
        assert_eq!(c.entry_cache_size, 1000);
    }

    #[test]
    fn toml_round_trip() {
        let c = DatabaseConfig::test_config().with_directory("data");
        let text = c.to_toml_string().unwrap();
        assert_eq!(DatabaseConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(
            DatabaseConfig::from_toml_str("references_count = \"many\""),
            Err(DbError::Config { path: None, .. })
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        std::fs::write(&path, "entry_cache_size = 10\n").unwrap();
        assert_eq!(DatabaseConfig::load(&path).unwrap().entry_cache_size, 10);
        assert!(matches!(
            DatabaseConfig::load(dir.path().join("missing.toml")),
            Err(DbError::Io(_))
        ));
    }

    #[test]
    fn derived_configs() {
        let c = DatabaseConfig::test_config();
        let sync = c.sync_config();
        assert_eq!(sync.retry_interval, Duration::from_millis(50));
        assert_eq!(sync.fetch_timeout, Duration::from_millis(500));
        let log = c.log_options("/weft/abc");
        assert_eq!(log.id.as_deref(), Some("/weft/abc"));
        assert_eq!(log.references_count, 16);
    }
}
