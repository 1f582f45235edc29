//! Storage collectors: write latency, filesystem usage and the diskstats cache.

use crate::clock::Clock;
use crate::providers::{FsStatsProvider, StorageInfo};
use crate::pull::tags::category;
use crate::pull::{run_blocking, Collector, PullContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use companion_common::EventRecord;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

const PERF_TEST_FILE: &str = "statsdperftest.tmp";
const PERF_TEST_BYTES: usize = 512;

// Keys written by the diskstats logger
const QUERY_TIME_KEY: &str = "queryTime";
const PACKAGE_NAMES_KEY: &str = "packageNames";
const APP_SIZES_KEY: &str = "appSizes";
const APP_DATA_KEY: &str = "appDataSizes";
const APP_CACHES_KEY: &str = "cacheSizes";

const CATEGORY_KEYS: [(i32, &str); 9] = [
    (category::APP_SIZE, "appSize"),
    (category::APP_DATA_SIZE, "appDataSize"),
    (category::APP_CACHE_SIZE, "cacheSize"),
    (category::PHOTOS, "photosSize"),
    (category::VIDEOS, "videosSize"),
    (category::AUDIO, "audioSize"),
    (category::DOWNLOADS, "downloadsSize"),
    (category::SYSTEM, "systemSize"),
    (category::OTHER, "otherSize"),
];

/// DISK_STATS: latency of a small synchronous write, encryption mode, write speed
pub struct DiskStats {
    clock: Arc<dyn Clock>,
    scratch_dir: PathBuf,
    storage: Option<Arc<dyn StorageInfo>>,
}

impl DiskStats {
    pub fn new(
        clock: Arc<dyn Clock>,
        scratch_dir: PathBuf,
        storage: Option<Arc<dyn StorageInfo>>,
    ) -> Self {
        Self {
            clock,
            scratch_dir,
            storage,
        }
    }
}

fn write_junk(path: &Path) -> std::io::Result<()> {
    let junk: Vec<u8> = (0..PERF_TEST_BYTES).map(|i| i as u8).collect();
    let mut file = fs::File::create(path)?;
    file.write_all(&junk)?;
    file.sync_all()
}

/// Milliseconds spent writing the scratch file, or -1
fn measure_latency(clock: &dyn Clock, scratch_dir: &Path) -> i64 {
    let path = scratch_dir.join(PERF_TEST_FILE);
    let before = clock.elapsed_realtime_ms();
    let result = write_junk(&path);
    let latency = clock.elapsed_realtime_ms() - before;
    if path.exists() {
        if let Err(e) = fs::remove_file(&path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
    match result {
        Ok(()) => latency,
        Err(e) => {
            error!("Error performing diskstats latency test: {}", e);
            -1
        }
    }
}

#[async_trait]
impl Collector for DiskStats {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let clock = Arc::clone(&self.clock);
        let scratch_dir = self.scratch_dir.clone();
        let storage = self.storage.clone();

        let measured = run_blocking("disk stats", move || {
            let latency = measure_latency(clock.as_ref(), &scratch_dir);
            let (file_based, write_speed) = match storage {
                Some(storage) => {
                    let speed = storage.recent_write_speed().unwrap_or_else(|e| {
                        warn!("Recent write speed unavailable: {}", e);
                        -1
                    });
                    (storage.file_based_encryption(), speed)
                }
                None => (false, -1),
            };
            (latency, file_based, write_speed)
        })
        .await;
        let Some((latency, file_based, write_speed)) = measured else {
            return Vec::new();
        };

        let mut e = ctx.record();
        e.write_long(latency).write_bool(file_based).write_int(write_speed);
        vec![e]
    }
}

/// DIRECTORY_USAGE: one record per (directory id, path)
pub struct DirectoryUsage {
    fs: Arc<dyn FsStatsProvider>,
    directories: [(i32, PathBuf); 3],
}

impl DirectoryUsage {
    pub fn new(fs: Arc<dyn FsStatsProvider>, directories: [(i32, PathBuf); 3]) -> Self {
        Self { fs, directories }
    }
}

#[async_trait]
impl Collector for DirectoryUsage {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let fs = Arc::clone(&self.fs);
        let directories = self.directories.clone();
        let ctx = *ctx;

        run_blocking("directory usage", move || {
            let mut out = Vec::with_capacity(directories.len());
            for (id, path) in &directories {
                match fs.usage(path) {
                    Ok(usage) => {
                        let mut e = ctx.record();
                        e.write_int(*id)
                            .write_long(usage.available_bytes)
                            .write_long(usage.total_bytes);
                        out.push(e);
                    }
                    Err(e) => warn!("statvfs on {} failed: {}", path.display(), e),
                }
            }
            out
        })
        .await
        .unwrap_or_default()
    }
}

fn read_cache(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse diskstats cache")
}

fn long_or_missing(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_i64).unwrap_or(-1)
}

fn array<'a>(json: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    json.get(key)
        .and_then(Value::as_array)
        .with_context(|| format!("diskstats cache has no '{}' array", key))
}

fn app_size_records(cache_path: &Path, ctx: &PullContext) -> Result<Vec<EventRecord>> {
    let json = read_cache(cache_path)?;
    let cache_time = long_or_missing(json.get(QUERY_TIME_KEY));
    let names = array(&json, PACKAGE_NAMES_KEY)?;
    let app = array(&json, APP_SIZES_KEY)?;
    let data = array(&json, APP_DATA_KEY)?;
    let cache = array(&json, APP_CACHES_KEY)?;

    let len = names.len();
    if app.len() != len || data.len() != len || cache.len() != len {
        error!("Formatting error in diskstats cache file: array lengths differ");
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let mut e = ctx.record();
        e.write_string(names[i].as_str().unwrap_or_default())
            .write_long(long_or_missing(app.get(i)))
            .write_long(long_or_missing(data.get(i)))
            .write_long(long_or_missing(cache.get(i)))
            .write_long(cache_time);
        out.push(e);
    }
    Ok(out)
}

/// APP_SIZE: package, app bytes, data bytes, cache bytes, cache time
pub struct AppSize {
    cache_path: PathBuf,
}

impl AppSize {
    pub fn new(cache_path: PathBuf) -> Self {
        Self { cache_path }
    }
}

#[async_trait]
impl Collector for AppSize {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let cache_path = self.cache_path.clone();
        let ctx = *ctx;
        match run_blocking("app size", move || app_size_records(&cache_path, &ctx)).await {
            Some(Ok(records)) => records,
            Some(Err(e)) => {
                error!("Exception reading diskstats cache file: {:#}", e);
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

/// CATEGORY_SIZE: nine aggregate records, -1 for missing values
pub struct CategorySize {
    cache_path: PathBuf,
}

impl CategorySize {
    pub fn new(cache_path: PathBuf) -> Self {
        Self { cache_path }
    }
}

#[async_trait]
impl Collector for CategorySize {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let cache_path = self.cache_path.clone();
        let json = match run_blocking("category size", move || read_cache(&cache_path)).await {
            Some(Ok(json)) => json,
            Some(Err(e)) => {
                error!("Exception reading diskstats cache file: {:#}", e);
                return Vec::new();
            }
            None => return Vec::new(),
        };
        let cache_time = long_or_missing(json.get(QUERY_TIME_KEY));

        CATEGORY_KEYS
            .iter()
            .map(|(id, key)| {
                let mut e = ctx.record();
                e.write_int(*id)
                    .write_long(long_or_missing(json.get(*key)))
                    .write_long(cache_time);
                e
            })
            .collect()
    }
}
