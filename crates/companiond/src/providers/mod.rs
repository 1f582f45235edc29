//! Metric providers.
//!
//! Each provider is a narrow trait: given a request, return zero or more raw
//! readings or fail. Collectors turn readings into event records. Providers
//! are optional; the pull dispatcher degrades a missing one to no records.
//!
//! Radio controllers (wifi, modem, bluetooth) answer through a callback; here
//! that is a `oneshot::Sender` the provider completes whenever it likes.

pub mod linux;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("remote call failed: {0}")]
    Remote(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Wifi,
    Mobile,
}

/// Per-uid traffic counters. `set` is 0 for background, 1 for foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkEntry {
    pub uid: i32,
    pub set: i32,
    pub rx_bytes: i64,
    pub rx_packets: i64,
    pub tx_bytes: i64,
    pub tx_packets: i64,
}

pub trait NetworkStatsProvider: Send + Sync {
    /// Counters grouped per uid, or per (uid, set) when `by_fg_bg` is set
    fn uid_stats(&self, transport: Transport, by_fg_bg: bool)
        -> ProviderResult<Vec<NetworkEntry>>;
}

// ============================================================================
// Radio controllers
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiActivityInfo {
    pub timestamp_ms: i64,
    pub stack_state: i32,
    pub tx_time_ms: i64,
    pub rx_time_ms: i64,
    pub idle_time_ms: i64,
    pub energy_used: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModemActivityInfo {
    pub timestamp_ms: i64,
    pub sleep_time_ms: i64,
    pub idle_time_ms: i64,
    /// Transmit time per power level
    pub tx_time_ms: [i64; 5],
    pub rx_time_ms: i64,
    pub energy_used: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UidTraffic {
    pub uid: i32,
    pub rx_bytes: i64,
    pub tx_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BluetoothActivityInfo {
    pub timestamp_ms: i64,
    pub stack_state: i32,
    pub tx_time_ms: i64,
    pub rx_time_ms: i64,
    pub idle_time_ms: i64,
    pub energy_used: i64,
    pub uid_traffic: Vec<UidTraffic>,
}

pub trait WifiController: Send + Sync {
    fn request_activity_info(&self, reply: oneshot::Sender<WifiActivityInfo>)
        -> ProviderResult<()>;
}

pub trait ModemController: Send + Sync {
    fn request_activity_info(&self, reply: oneshot::Sender<ModemActivityInfo>)
        -> ProviderResult<()>;
}

pub trait BluetoothController: Send + Sync {
    fn request_activity_info(
        &self,
        reply: oneshot::Sender<BluetoothActivityInfo>,
    ) -> ProviderResult<()>;
}

// ============================================================================
// Kernel and CPU
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelWakelock {
    pub name: String,
    pub count: i32,
    pub version: i32,
    pub total_time_us: i64,
}

pub trait KernelWakelockProvider: Send + Sync {
    fn read(&self) -> ProviderResult<Vec<KernelWakelock>>;
}

pub trait CpuFreqProvider: Send + Sync {
    /// Per cluster, cumulative ms spent at each speed step (lowest first)
    fn cluster_times(&self) -> ProviderResult<Vec<Vec<i64>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidCpuTime {
    pub uid: i32,
    pub user_us: i64,
    pub system_us: i64,
}

pub trait UidCpuProvider: Send + Sync {
    fn uid_times(&self) -> ProviderResult<Vec<UidCpuTime>>;
    /// Per uid, ms at each frequency index
    fn uid_freq_times(&self) -> ProviderResult<Vec<(i32, Vec<i64>)>>;
    /// Per uid, ms on each cluster
    fn uid_cluster_times(&self) -> ProviderResult<Vec<(i32, Vec<i64>)>>;
    /// Per uid, ms of active cpu time
    fn uid_active_times(&self) -> ProviderResult<Vec<(i32, i64)>>;
}

// ============================================================================
// Processes and IPC
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMemoryState {
    pub uid: i32,
    pub process_name: String,
    pub oom_score: i32,
    pub pgfault: i64,
    pub pgmajfault: i64,
    pub rss_bytes: i64,
    pub cache_bytes: i64,
    pub swap_bytes: i64,
    pub rss_high_watermark_bytes: i64,
}

pub trait ProcessMemoryProvider: Send + Sync {
    fn processes(&self) -> ProviderResult<Vec<ProcessMemoryState>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderCallStat {
    pub uid: i32,
    pub class_name: String,
    pub method_name: String,
    pub call_count: i64,
    pub exception_count: i64,
    pub latency_us: i64,
    pub max_latency_us: i64,
    pub cpu_time_us: i64,
    pub max_cpu_time_us: i64,
    pub max_reply_size_bytes: i64,
    pub max_request_size_bytes: i64,
    pub recorded_call_count: i64,
    pub screen_interactive: bool,
}

pub trait BinderStatsProvider: Send + Sync {
    fn call_stats(&self) -> ProviderResult<Vec<BinderCallStat>>;
    fn exception_counts(&self) -> ProviderResult<Vec<(String, i32)>>;
    /// Clear accumulated call stats
    fn reset(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LooperEntry {
    pub work_source_uid: i32,
    pub handler_class: String,
    pub thread_name: String,
    pub message_name: String,
    pub message_count: i64,
    pub exception_count: i64,
    pub recorded_message_count: i64,
    pub total_latency_us: i64,
    pub cpu_usage_us: i64,
    pub is_interactive: bool,
}

pub trait LooperStatsProvider: Send + Sync {
    fn entries(&self) -> ProviderResult<Vec<LooperEntry>>;
    fn reset(&self);
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub available_bytes: i64,
    pub total_bytes: i64,
}

pub trait FsStatsProvider: Send + Sync {
    fn usage(&self, path: &Path) -> ProviderResult<FsUsage>;
}

pub trait StorageInfo: Send + Sync {
    fn file_based_encryption(&self) -> bool;
    /// Recent write speed from the storage daemon
    fn recent_write_speed(&self) -> ProviderResult<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UidIoStats {
    pub uid: i32,
    pub fg_chars_read: i64,
    pub fg_chars_write: i64,
    pub fg_bytes_read: i64,
    pub fg_bytes_write: i64,
    pub bg_chars_read: i64,
    pub bg_chars_write: i64,
    pub bg_bytes_read: i64,
    pub bg_bytes_write: i64,
    pub fg_fsync: i64,
    pub bg_fsync: i64,
}

pub trait DiskIoProvider: Send + Sync {
    fn uid_io(&self) -> ProviderResult<Vec<UidIoStats>>;
}

// ============================================================================
// Everything else
// ============================================================================

pub trait FingerprintProvider: Send + Sync {
    /// (user id, enrolled fingerprint count) per user
    fn enrolled_counts(&self) -> ProviderResult<Vec<(i32, i32)>>;
}

/// Process accounting committed since a high-water mark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedStats {
    pub high_water_mark: i64,
    pub files: Vec<Vec<u8>>,
}

pub trait ProcStatsProvider: Send + Sync {
    fn committed_stats(&self, since_mark: i64) -> ProviderResult<CommittedStats>;
}

pub trait PowerProfileProvider: Send + Sync {
    /// Serialized power profile
    fn serialized(&self) -> ProviderResult<Vec<u8>>;
}

/// Every provider handle the pull dispatcher can use
#[derive(Clone, Default)]
pub struct Providers {
    pub network: Option<Arc<dyn NetworkStatsProvider>>,
    pub wifi: Option<Arc<dyn WifiController>>,
    pub modem: Option<Arc<dyn ModemController>>,
    pub bluetooth: Option<Arc<dyn BluetoothController>>,
    pub wakelocks: Option<Arc<dyn KernelWakelockProvider>>,
    pub cpu_freq: Option<Arc<dyn CpuFreqProvider>>,
    pub uid_cpu: Option<Arc<dyn UidCpuProvider>>,
    pub process_memory: Option<Arc<dyn ProcessMemoryProvider>>,
    pub binder: Option<Arc<dyn BinderStatsProvider>>,
    pub looper: Option<Arc<dyn LooperStatsProvider>>,
    pub fs: Option<Arc<dyn FsStatsProvider>>,
    pub storage: Option<Arc<dyn StorageInfo>>,
    pub disk_io: Option<Arc<dyn DiskIoProvider>>,
    pub fingerprints: Option<Arc<dyn FingerprintProvider>>,
    pub procstats: Option<Arc<dyn ProcStatsProvider>>,
    pub power_profile: Option<Arc<dyn PowerProfileProvider>>,
}

impl Providers {
    /// Providers backed by this host's kernel interfaces
    pub fn linux() -> Self {
        Self {
            wakelocks: Some(Arc::new(linux::WakeupSources::default())),
            cpu_freq: Some(Arc::new(linux::CpufreqStats::default())),
            fs: Some(Arc::new(linux::Statvfs)),
            storage: Some(Arc::new(linux::LocalStorage)),
            ..Self::default()
        }
    }
}
