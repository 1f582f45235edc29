//! Providers backed by Linux kernel interfaces.

use super::{
    CpuFreqProvider, FsStatsProvider, FsUsage, KernelWakelock, KernelWakelockProvider,
    ProviderError, ProviderResult, StorageInfo,
};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::warn;

const WAKEUP_SOURCES_PATH: &str = "/sys/kernel/debug/wakeup_sources";
const CPUFREQ_BASE: &str = "/sys/devices/system/cpu/cpufreq";

/// time_in_state reports in USER_HZ ticks
const CPUFREQ_TICK_MS: i64 = 10;

/// Kernel wakeup sources, read from debugfs
pub struct WakeupSources {
    path: PathBuf,
}

impl Default for WakeupSources {
    fn default() -> Self {
        Self::new(WAKEUP_SOURCES_PATH)
    }
}

impl WakeupSources {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KernelWakelockProvider for WakeupSources {
    fn read(&self) -> ProviderResult<Vec<KernelWakelock>> {
        let text = fs::read_to_string(&self.path)?;
        parse_wakeup_sources(&text)
    }
}

/// Parse the debugfs table:
/// `name active_count event_count wakeup_count expire_count active_since total_time ...`
/// with times in milliseconds.
pub fn parse_wakeup_sources(text: &str) -> ProviderResult<Vec<KernelWakelock>> {
    let mut lines = text.lines();
    let header = lines
        .next()
        .ok_or_else(|| ProviderError::Parse("empty wakeup_sources".into()))?;
    let columns: Vec<&str> = header.split_whitespace().collect();
    let col = |name: &str| {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| ProviderError::Parse(format!("missing column {}", name)))
    };
    let count_col = col("active_count")?;
    let total_col = col("total_time")?;

    let mut out = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= count_col.max(total_col) {
            continue;
        }
        let (count, total_ms) = match (
            fields[count_col].parse::<i32>(),
            fields[total_col].parse::<i64>(),
        ) {
            (Ok(count), Ok(total_ms)) => (count, total_ms),
            _ => {
                warn!("Skipping unparsable wakeup source row '{}'", line);
                continue;
            }
        };
        out.push(KernelWakelock {
            name: fields[0].to_string(),
            count,
            version: 0,
            total_time_us: total_ms * 1000,
        });
    }
    Ok(out)
}

/// Per-policy cpufreq residency; each policy is one cluster
pub struct CpufreqStats {
    base: PathBuf,
}

impl Default for CpufreqStats {
    fn default() -> Self {
        Self::new(CPUFREQ_BASE)
    }
}

impl CpufreqStats {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl CpuFreqProvider for CpufreqStats {
    fn cluster_times(&self) -> ProviderResult<Vec<Vec<i64>>> {
        let mut policies: Vec<(u32, PathBuf)> = fs::read_dir(&self.base)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                let index = name.strip_prefix("policy")?.parse::<u32>().ok()?;
                Some((index, e.path()))
            })
            .collect();
        policies.sort_by_key(|(index, _)| *index);

        let mut clusters = Vec::with_capacity(policies.len());
        for (_, dir) in policies {
            let text = fs::read_to_string(dir.join("stats").join("time_in_state"))?;
            clusters.push(parse_time_in_state(&text)?);
        }
        Ok(clusters)
    }
}

/// `freq_khz ticks` per line, lowest frequency first
pub fn parse_time_in_state(text: &str) -> ProviderResult<Vec<i64>> {
    let mut rows: Vec<(u64, i64)> = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.split_whitespace();
        let (Some(freq), Some(ticks)) = (parts.next(), parts.next()) else {
            return Err(ProviderError::Parse(format!("bad time_in_state line '{}'", line)));
        };
        let freq = freq
            .parse::<u64>()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let ticks = ticks
            .parse::<i64>()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        rows.push((freq, ticks * CPUFREQ_TICK_MS));
    }
    rows.sort_by_key(|(freq, _)| *freq);
    Ok(rows.into_iter().map(|(_, ms)| ms).collect())
}

/// Filesystem usage via statvfs(3)
pub struct Statvfs;

impl FsStatsProvider for Statvfs {
    fn usage(&self, path: &Path) -> ProviderResult<FsUsage> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        // SAFETY: zeroed statvfs is a valid out-parameter.
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL-terminated and st is writable.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        if rc != 0 {
            return Err(ProviderError::Io(std::io::Error::last_os_error()));
        }
        let frsize = st.f_frsize as i64;
        Ok(FsUsage {
            available_bytes: st.f_bavail as i64 * frsize,
            total_bytes: st.f_blocks as i64 * frsize,
        })
    }
}

/// Storage facts for a plain Linux host
pub struct LocalStorage;

impl StorageInfo for LocalStorage {
    fn file_based_encryption(&self) -> bool {
        // Mount options that only make sense with fscrypt in use.
        fs::read_to_string("/proc/mounts")
            .map(|mounts| {
                mounts
                    .lines()
                    .any(|l| l.contains("inlinecrypt") || l.contains("test_dummy_encryption"))
            })
            .unwrap_or(false)
    }

    fn recent_write_speed(&self) -> ProviderResult<i32> {
        Err(ProviderError::Unavailable("no storage daemon on this host".into()))
    }
}
