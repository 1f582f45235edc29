//! Clocks, processes, IPC accounting and the remaining single-provider tags.

use crate::clock::Clock;
use crate::providers::{
    BinderStatsProvider, DiskIoProvider, FingerprintProvider, KernelWakelockProvider,
    LooperStatsProvider, PowerProfileProvider, ProcessMemoryProvider,
};
use crate::pull::{run_blocking, Collector, PullContext};
use async_trait::async_trait;
use companion_common::EventRecord;
use std::sync::Arc;
use tracing::warn;

/// SYSTEM_ELAPSED_REALTIME: ms since boot, including suspend
pub struct ElapsedRealtime {
    clock: Arc<dyn Clock>,
}

impl ElapsedRealtime {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Collector for ElapsedRealtime {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let mut e = ctx.record();
        e.write_long(self.clock.elapsed_realtime_ms());
        vec![e]
    }
}

/// SYSTEM_UPTIME: ms since boot, excluding suspend
pub struct Uptime {
    clock: Arc<dyn Clock>,
}

impl Uptime {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Collector for Uptime {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let mut e = ctx.record();
        e.write_long(self.clock.uptime_ms());
        vec![e]
    }
}

/// KERNEL_WAKELOCK: name, count, version, total_time
pub struct KernelWakelocks {
    provider: Arc<dyn KernelWakelockProvider>,
}

impl KernelWakelocks {
    pub fn new(provider: Arc<dyn KernelWakelockProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for KernelWakelocks {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let provider = Arc::clone(&self.provider);
        let Some(result) = run_blocking("kernel wakelock", move || provider.read()).await else {
            return Vec::new();
        };
        match result {
            Ok(locks) => locks
                .into_iter()
                .map(|lock| {
                    let mut e = ctx.record();
                    e.write_string(lock.name)
                        .write_int(lock.count)
                        .write_int(lock.version)
                        .write_long(lock.total_time_us);
                    e
                })
                .collect(),
            Err(e) => {
                warn!("Reading kernel wakelocks failed: {}", e);
                Vec::new()
            }
        }
    }
}

pub struct ProcessMemory {
    provider: Arc<dyn ProcessMemoryProvider>,
}

impl ProcessMemory {
    pub fn new(provider: Arc<dyn ProcessMemoryProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for ProcessMemory {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        match self.provider.processes() {
            Ok(processes) => processes
                .into_iter()
                .map(|p| {
                    let mut e = ctx.record();
                    e.write_int(p.uid)
                        .write_string(p.process_name)
                        .write_int(p.oom_score)
                        .write_long(p.pgfault)
                        .write_long(p.pgmajfault)
                        .write_long(p.rss_bytes)
                        .write_long(p.cache_bytes)
                        .write_long(p.swap_bytes)
                        .write_long(p.rss_high_watermark_bytes);
                    e
                })
                .collect(),
            Err(e) => {
                warn!("Reading process memory state failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// BINDER_CALLS; the provider's counters are reset after each read
pub struct BinderCalls {
    provider: Arc<dyn BinderStatsProvider>,
}

impl BinderCalls {
    pub fn new(provider: Arc<dyn BinderStatsProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for BinderCalls {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let stats = match self.provider.call_stats() {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Reading binder call stats failed: {}", e);
                return Vec::new();
            }
        };
        self.provider.reset();

        stats
            .into_iter()
            .map(|s| {
                let mut e = ctx.record();
                e.write_int(s.uid)
                    .write_string(s.class_name)
                    .write_string(s.method_name)
                    .write_long(s.call_count)
                    .write_long(s.exception_count)
                    .write_long(s.latency_us)
                    .write_long(s.max_latency_us)
                    .write_long(s.cpu_time_us)
                    .write_long(s.max_cpu_time_us)
                    .write_long(s.max_reply_size_bytes)
                    .write_long(s.max_request_size_bytes)
                    .write_long(s.recorded_call_count)
                    .write_int(i32::from(s.screen_interactive));
                e
            })
            .collect()
    }
}

/// BINDER_CALLS_EXCEPTIONS: exception name, count
pub struct BinderExceptions {
    provider: Arc<dyn BinderStatsProvider>,
}

impl BinderExceptions {
    pub fn new(provider: Arc<dyn BinderStatsProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for BinderExceptions {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        match self.provider.exception_counts() {
            Ok(counts) => counts
                .into_iter()
                .map(|(name, count)| {
                    let mut e = ctx.record();
                    e.write_string(name).write_int(count);
                    e
                })
                .collect(),
            Err(e) => {
                warn!("Reading binder exception counts failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// LOOPER_STATS; reset after each read like binder stats
pub struct Looper {
    provider: Arc<dyn LooperStatsProvider>,
}

impl Looper {
    pub fn new(provider: Arc<dyn LooperStatsProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for Looper {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let entries = match self.provider.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Reading looper stats failed: {}", e);
                return Vec::new();
            }
        };
        self.provider.reset();

        entries
            .into_iter()
            .map(|entry| {
                let mut e = ctx.record();
                e.write_int(entry.work_source_uid)
                    .write_string(entry.handler_class)
                    .write_string(entry.thread_name)
                    .write_string(entry.message_name)
                    .write_long(entry.message_count)
                    .write_long(entry.exception_count)
                    .write_long(entry.recorded_message_count)
                    .write_long(entry.total_latency_us)
                    .write_long(entry.cpu_usage_us)
                    .write_bool(entry.is_interactive);
                e
            })
            .collect()
    }
}

/// NUM_FINGERPRINTS: user id, enrolled count
pub struct NumFingerprints {
    provider: Arc<dyn FingerprintProvider>,
}

impl NumFingerprints {
    pub fn new(provider: Arc<dyn FingerprintProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for NumFingerprints {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        match self.provider.enrolled_counts() {
            Ok(users) => users
                .into_iter()
                .map(|(user_id, count)| {
                    let mut e = ctx.record();
                    e.write_int(user_id).write_int(count);
                    e
                })
                .collect(),
            Err(e) => {
                warn!("Reading fingerprint counts failed: {}", e);
                Vec::new()
            }
        }
    }
}

pub struct PowerProfile {
    provider: Arc<dyn PowerProfileProvider>,
}

impl PowerProfile {
    pub fn new(provider: Arc<dyn PowerProfileProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for PowerProfile {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        match self.provider.serialized() {
            Ok(bytes) => {
                let mut e = ctx.record();
                e.write_storage(bytes);
                vec![e]
            }
            Err(e) => {
                warn!("Serializing power profile failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// DISK_IO: uid then fg/bg chars and bytes read/written and fsync counts
pub struct DiskIo {
    provider: Arc<dyn DiskIoProvider>,
}

impl DiskIo {
    pub fn new(provider: Arc<dyn DiskIoProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for DiskIo {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        match self.provider.uid_io() {
            Ok(rows) => rows
                .into_iter()
                .map(|io| {
                    let mut e = ctx.record();
                    e.write_int(io.uid)
                        .write_long(io.fg_chars_read)
                        .write_long(io.fg_chars_write)
                        .write_long(io.fg_bytes_read)
                        .write_long(io.fg_bytes_write)
                        .write_long(io.bg_chars_read)
                        .write_long(io.bg_chars_write)
                        .write_long(io.bg_bytes_read)
                        .write_long(io.bg_bytes_write)
                        .write_long(io.fg_fsync)
                        .write_long(io.bg_fsync);
                    e
                })
                .collect(),
            Err(e) => {
                warn!("Reading per-uid disk io failed: {}", e);
                Vec::new()
            }
        }
    }
}
