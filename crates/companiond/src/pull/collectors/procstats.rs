//! PROC_STATS: committed process accounting since the last delivered mark.
//!
//! The mark lives on disk as the name of the only file in the state
//! directory, so it survives restarts.

use crate::providers::ProcStatsProvider;
use crate::pull::{run_blocking, Collector, PullContext};
use async_trait::async_trait;
use companion_common::EventRecord;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Read the persisted mark, 0 if absent or unreadable
pub fn read_high_water_mark(state_dir: &Path) -> i64 {
    let entries = match fs::read_dir(state_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            error!("Failed to list procstats state dir {}: {}", state_dir.display(), e);
            return 0;
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let Some(first) = names.first() else {
        return 0;
    };
    if names.len() > 1 {
        error!("Only 1 file expected for high water mark. Found {}", names.len());
    }
    first.parse().unwrap_or_else(|_| {
        error!("Failed to parse high water mark file name '{}'", first);
        0
    })
}

pub struct ProcStats {
    provider: Arc<dyn ProcStatsProvider>,
    state_dir: PathBuf,
    /// Last delivered mark; the lock also serializes marker rewrites
    mark: Mutex<i64>,
}

impl ProcStats {
    pub fn new(provider: Arc<dyn ProcStatsProvider>, state_dir: PathBuf) -> Self {
        let mark = read_high_water_mark(&state_dir);
        debug!("Procstats high water mark starts at {}", mark);
        Self {
            provider,
            state_dir,
            mark: Mutex::new(mark),
        }
    }

    pub async fn high_water_mark(&self) -> i64 {
        *self.mark.lock().await
    }
}

/// Swap the marker file for `old` with one for `new`
fn persist(state_dir: &Path, old: i64, new: i64) -> io::Result<()> {
    let old_path = state_dir.join(old.to_string());
    match fs::remove_file(&old_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", old_path.display(), e),
    }
    fs::create_dir_all(state_dir)?;
    fs::File::create(state_dir.join(new.to_string()))?;
    Ok(())
}

/// Fetch stats committed since `mark` and persist the new mark.
/// Returns the record and the mark to remember.
fn pull_since(
    provider: &dyn ProcStatsProvider,
    state_dir: &Path,
    mark: i64,
    ctx: &PullContext,
) -> Option<(EventRecord, i64)> {
    let committed = match provider.committed_stats(mark) {
        Ok(committed) => committed,
        Err(e) => {
            error!("Getting procstats failed: {}", e);
            return None;
        }
    };
    let stats = match <[Vec<u8>; 1]>::try_from(committed.files) {
        Ok([stats]) => stats,
        Err(files) => {
            debug!("Expected 1 procstats file, got {}", files.len());
            return None;
        }
    };

    let mut e = ctx.record();
    e.write_storage(stats);

    if let Err(err) = persist(state_dir, mark, committed.high_water_mark) {
        error!("Persisting procstats high water mark failed: {}", err);
    }
    Some((e, committed.high_water_mark))
}

#[async_trait]
impl Collector for ProcStats {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let mut mark = self.mark.lock().await;

        let provider = Arc::clone(&self.provider);
        let state_dir = self.state_dir.clone();
        let since = *mark;
        let ctx = *ctx;
        let pulled = run_blocking("procstats", move || {
            pull_since(provider.as_ref(), &state_dir, since, &ctx)
        })
        .await
        .flatten();

        match pulled {
            Some((record, new_mark)) => {
                *mark = new_mark;
                vec![record]
            }
            None => Vec::new(),
        }
    }
}
