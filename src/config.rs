//! Configuration management for sitesync

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default total size of file content copied into one snapshot (100MB)
pub const DEFAULT_SNAPSHOT_BUDGET: u64 = 100 * 1024 * 1024;

/// Default number of snapshots kept per project
pub const DEFAULT_MAX_SNAPSHOTS: usize = 10;

/// Default number of connection attempts per sync run
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default on-demand retries allowed for a single failed file
pub const DEFAULT_MAX_FILE_RETRIES: u32 = 3;

/// Upper bound for parallel transport connections
pub const MAX_CONNECTIONS: usize = 8;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ==================== Storage ====================

    /// Directory holding signature caches, snapshots and project records
    pub data_dir: Option<PathBuf>,

    /// Byte budget for content backups in a single snapshot
    pub snapshot_budget: u64,

    /// Snapshots kept per project (oldest pruned first)
    pub max_snapshots: usize,

    // ==================== Connection ====================

    /// Timeout for establishing a transport connection in seconds
    pub connect_timeout_secs: u64,

    /// Wall-clock limit for a connection probe in seconds
    pub probe_timeout_secs: u64,

    /// Parallel transport connections during upload (1 = sequential)
    pub connections: usize,

    // ==================== Retry ====================

    /// Connection attempts per run before giving up
    pub max_attempts: u32,

    /// Retry delay base in milliseconds
    pub retry_delay_ms: u64,

    /// Retry delay ceiling in milliseconds
    pub max_retry_delay_ms: u64,

    /// On-demand retries allowed per failed file
    pub max_file_retries: u32,

    // ==================== Output ====================

    /// Show progress bars
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            snapshot_budget: DEFAULT_SNAPSHOT_BUDGET,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,

            connect_timeout_secs: 10,
            probe_timeout_secs: 15,
            connections: 1,

            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            max_file_retries: DEFAULT_MAX_FILE_RETRIES,

            progress: true,
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io("reading config", e))?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("creating config dir", e))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("serializing config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| Error::io("writing config", e))?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("sitesync").join("config.toml"))
            .ok_or_else(|| Error::config("could not determine config directory"))
    }

    /// Resolve the data directory (explicit setting or the platform data dir)
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|p| p.join("sitesync"))
                .ok_or_else(|| Error::config("could not determine data directory")),
        }
    }

    /// Number of upload connections, clamped to `1..=MAX_CONNECTIONS`
    pub fn effective_connections(&self) -> usize {
        self.connections.clamp(1, MAX_CONNECTIONS)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Probe timeout as a duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// Parse a size string like "100", "100K", "100M", "100G" into bytes
    pub fn parse_size(s: &str) -> Result<u64> {
        let s = s.trim().to_uppercase();
        if s.is_empty() {
            return Ok(0);
        }

        let s = s.strip_suffix('B').unwrap_or(s.as_str());
        let (num_part, multiplier) = match s.chars().last() {
            Some('K') => (&s[..s.len() - 1], 1024u64),
            Some('M') => (&s[..s.len() - 1], 1024u64 * 1024),
            Some('G') => (&s[..s.len() - 1], 1024u64 * 1024 * 1024),
            Some('T') => (&s[..s.len() - 1], 1024u64 * 1024 * 1024 * 1024),
            _ => (s, 1u64),
        };

        let num: u64 = num_part
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("invalid size value: {}", s)))?;

        Ok(num * multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.snapshot_budget, DEFAULT_SNAPSHOT_BUDGET);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.connections, 1);
        assert!(config.progress);
    }

    #[test]
    fn test_effective_connections() {
        let mut config = Config::default();
        config.connections = 0;
        assert_eq!(config.effective_connections(), 1);

        config.connections = 4;
        assert_eq!(config.effective_connections(), 4);

        config.connections = 64;
        assert_eq!(config.effective_connections(), MAX_CONNECTIONS);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(Config::parse_size("100").unwrap(), 100);
        assert_eq!(Config::parse_size("64K").unwrap(), 64 * 1024);
        assert_eq!(Config::parse_size("10MB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(Config::parse_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert!(Config::parse_size("lots").is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_defaults() {
        let parsed: Config = toml::from_str("max_attempts = 5\nconnections = 2\n").unwrap();
        assert_eq!(parsed.max_attempts, 5);
        assert_eq!(parsed.connections, 2);
        assert_eq!(parsed.max_snapshots, DEFAULT_MAX_SNAPSHOTS);
    }
}
