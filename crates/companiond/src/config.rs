//! Configuration management for companiond.
//!
//! Loads settings from /etc/stats-companion/config.toml or uses defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/stats-companion/config.toml";

/// Where things live on disk and on the socket namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Inbound RPC socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket the stats daemon listens on
    #[serde(default = "default_daemon_socket_path")]
    pub daemon_socket_path: PathBuf,

    /// Host broadcast bus for outbound intents
    #[serde(default = "default_broadcast_socket_path")]
    pub broadcast_socket_path: PathBuf,

    /// Stored daemon configurations (crash-loop mitigation deletes from here)
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Directory holding the procstats high-water-mark marker
    #[serde(default = "default_procstats_state_dir")]
    pub procstats_state_dir: PathBuf,

    /// Directory for the disk latency scratch file
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// JSON cache written by the disk stats logger
    #[serde(default = "default_diskstats_cache_path")]
    pub diskstats_cache_path: PathBuf,

    /// Installed packages per user
    #[serde(default = "default_package_manifest_path")]
    pub package_manifest_path: PathBuf,

    /// Filesystems reported by DIRECTORY_USAGE
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_system_dir")]
    pub system_dir: PathBuf,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(companion_common::DEFAULT_SOCKET_PATH)
}

fn default_daemon_socket_path() -> PathBuf {
    PathBuf::from("/run/statsd/statsd.sock")
}

fn default_broadcast_socket_path() -> PathBuf {
    PathBuf::from("/run/stats-companion/broadcast.sock")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/var/lib/statsd/configs")
}

fn default_procstats_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/stats-companion/procstats")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/var/lib/stats-companion")
}

fn default_diskstats_cache_path() -> PathBuf {
    PathBuf::from("/var/cache/diskstats/diskstats_cache.json")
}

fn default_package_manifest_path() -> PathBuf {
    PathBuf::from("/var/lib/stats-companion/packages.json")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache")
}

fn default_system_dir() -> PathBuf {
    PathBuf::from("/usr")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            daemon_socket_path: default_daemon_socket_path(),
            broadcast_socket_path: default_broadcast_socket_path(),
            config_dir: default_config_dir(),
            procstats_state_dir: default_procstats_state_dir(),
            scratch_dir: default_scratch_dir(),
            diskstats_cache_path: default_diskstats_cache_path(),
            package_manifest_path: default_package_manifest_path(),
            data_dir: default_data_dir(),
            cache_dir: default_cache_dir(),
            system_dir: default_system_dir(),
        }
    }
}

/// Crash-loop mitigation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashLoopConfig {
    /// Deaths within the window that trigger a config deletion
    #[serde(default = "default_death_threshold")]
    pub death_threshold: usize,

    #[serde(default = "default_death_window_secs")]
    pub death_window_secs: u64,

    /// How long deleted-config entries stay in the report
    #[serde(default = "default_deleted_retention_secs")]
    pub deleted_retention_secs: u64,
}

fn default_death_threshold() -> usize {
    10
}

fn default_death_window_secs() -> u64 {
    24 * 60 * 60
}

fn default_deleted_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CrashLoopConfig {
    fn default() -> Self {
        Self {
            death_threshold: default_death_threshold(),
            death_window_secs: default_death_window_secs(),
            deleted_retention_secs: default_deleted_retention_secs(),
        }
    }
}

/// Pull tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// Bound on waits for radio/wireless controller energy counters
    #[serde(default = "default_controller_timeout_ms")]
    pub controller_timeout_ms: u64,
}

fn default_controller_timeout_ms() -> u64 {
    2000
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            controller_timeout_ms: default_controller_timeout_ms(),
        }
    }
}

impl PullConfig {
    pub fn controller_timeout(&self) -> Duration {
        Duration::from_millis(self.controller_timeout_ms)
    }
}

/// Who may call the permission-gated RPCs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Uids holding the companion permission (root always passes)
    #[serde(default)]
    pub authorized_uids: Vec<u32>,
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanionConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub crash_loop: CrashLoopConfig,

    #[serde(default)]
    pub pull: PullConfig,

    #[serde(default)]
    pub access: AccessConfig,
}

impl CompanionConfig {
    /// Load config from the default location, or defaults
    pub fn load() -> Self {
        Self::load_or_default(Path::new(CONFIG_PATH))
    }

    /// Load config from `path`; a missing or unparsable file yields defaults
    pub fn load_or_default(path: &Path) -> Self {
        Self::load_from_path(path).unwrap_or_else(|e| {
            warn!("Config not loaded from {}, using defaults: {}", path.display(), e);
            CompanionConfig::default()
        })
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CompanionConfig = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CompanionConfig::default();
        assert_eq!(config.crash_loop.death_threshold, 10);
        assert_eq!(config.crash_loop.death_window_secs, 86_400);
        assert_eq!(config.crash_loop.deleted_retention_secs, 604_800);
        assert_eq!(config.pull.controller_timeout(), Duration::from_millis(2000));
        assert!(config.access.authorized_uids.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[paths]
config_dir = "/tmp/statsd-configs"

[crash_loop]
death_threshold = 3

[access]
authorized_uids = [1000, 1066]
"#;
        let config: CompanionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.paths.config_dir, PathBuf::from("/tmp/statsd-configs"));
        assert_eq!(config.crash_loop.death_threshold, 3);
        assert_eq!(config.access.authorized_uids, vec![1000, 1066]);
        // Missing fields fall back to defaults
        assert_eq!(config.crash_loop.death_window_secs, 86_400);
        assert_eq!(config.paths.socket_path, default_socket_path());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CompanionConfig::load_or_default(&dir.path().join("absent.toml"));
        assert_eq!(config.pull.controller_timeout_ms, 2000);
    }

    #[test]
    fn test_garbage_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[paths\nnot toml").unwrap();
        let config = CompanionConfig::load_or_default(&path);
        assert_eq!(config.crash_loop.death_threshold, 10);
    }
}
