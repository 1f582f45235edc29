//! Crash-loop mitigation.
//!
//! Every daemon death is timestamped on the boot clock, so wall clock changes
//! neither hide a crash loop nor stretch one. When enough deaths pile up
//! inside the rolling window, one stored configuration is deleted on the assumption that
//! a bad config is what keeps killing the daemon. Deletions are kept in a
//! short audit log for `dump`.

use crate::config::CrashLoopConfig;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const DEATH_THRESHOLD: usize = 10;
pub const DEATH_WINDOW_MS: i64 = 24 * 60 * 60 * 1000; // 1 day
pub const DELETED_RETENTION_MS: i64 = 7 * DEATH_WINDOW_MS; // 1 week

/// A config removed by crash-loop mitigation
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeletedConfig {
    /// Wall time of the deletion, for display only
    wall_ms: i64,
    name: String,
}

/// Death timestamps plus the deleted-config audit trail, keyed by boot time
#[derive(Debug, Clone)]
pub struct CrashHistory {
    death_timestamps: BTreeSet<i64>,
    deleted_configs: BTreeMap<i64, DeletedConfig>,
    threshold: usize,
    window_ms: i64,
    retention_ms: i64,
}

impl Default for CrashHistory {
    fn default() -> Self {
        Self::new(DEATH_THRESHOLD, DEATH_WINDOW_MS, DELETED_RETENTION_MS)
    }
}

impl CrashHistory {
    pub fn new(threshold: usize, window_ms: i64, retention_ms: i64) -> Self {
        Self {
            death_timestamps: BTreeSet::new(),
            deleted_configs: BTreeMap::new(),
            threshold: threshold.max(1),
            window_ms,
            retention_ms,
        }
    }

    pub fn from_config(config: &CrashLoopConfig) -> Self {
        Self::new(
            config.death_threshold,
            config.death_window_secs as i64 * 1000,
            config.deleted_retention_secs as i64 * 1000,
        )
    }

    /// Record a death at `now_ms` on the boot clock. `wall_ms` only labels
    /// a deletion in the audit log.
    ///
    /// Returns the name of the configuration file deleted, if this death
    /// tripped the threshold and the directory had something to delete.
    pub fn record_death(
        &mut self,
        now_ms: i64,
        wall_ms: i64,
        config_dir: &Path,
    ) -> Option<String> {
        let death_cutoff = now_ms - self.window_ms;
        self.death_timestamps.retain(|&t| t >= death_cutoff);

        let deleted_cutoff = now_ms - self.retention_ms;
        self.deleted_configs.retain(|&t, _| t >= deleted_cutoff);

        self.death_timestamps.insert(now_ms);
        if self.death_timestamps.len() < self.threshold {
            return None;
        }

        warn!(
            "Stats daemon died {} times within {} ms; discarding one stored config",
            self.death_timestamps.len(),
            self.window_ms
        );
        self.death_timestamps.clear();

        let name = first_config_file(config_dir)?;
        match fs::remove_file(config_dir.join(&name)) {
            Ok(()) => {
                info!("Deleted config {} after repeated daemon deaths", name);
                self.deleted_configs.insert(
                    now_ms,
                    DeletedConfig {
                        wall_ms,
                        name: name.clone(),
                    },
                );
                Some(name)
            }
            Err(e) => {
                warn!("Failed to delete config {}: {}", name, e);
                None
            }
        }
    }

    /// Deaths currently counted toward the threshold
    pub fn recent_deaths(&self) -> usize {
        self.death_timestamps.len()
    }

    /// Deleted configs as (wall ms, file name), oldest first
    pub fn deleted_configs(&self) -> impl Iterator<Item = (i64, &str)> {
        self.deleted_configs
            .values()
            .map(|deleted| (deleted.wall_ms, deleted.name.as_str()))
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted_configs.len()
    }
}

/// First regular file in `dir` by name, so repeated runs pick deterministically
fn first_config_file(dir: &Path) -> Option<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list config dir {}: {}", dir.display(), e);
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .min()
}
