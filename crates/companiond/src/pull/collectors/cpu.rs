//! CPU time collectors.

use crate::providers::{CpuFreqProvider, UidCpuProvider};
use crate::pull::{run_blocking, Collector, PullContext};
use async_trait::async_trait;
use companion_common::EventRecord;
use std::sync::Arc;
use tracing::warn;

/// CPU_TIME_PER_FREQ: cluster, speed index, time_ms.
/// Speeds are reported highest index first.
pub struct CpuTimePerFreq {
    provider: Arc<dyn CpuFreqProvider>,
}

impl CpuTimePerFreq {
    pub fn new(provider: Arc<dyn CpuFreqProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Collector for CpuTimePerFreq {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let provider = Arc::clone(&self.provider);
        let clusters = match run_blocking("cpu frequency", move || provider.cluster_times()).await {
            Some(Ok(clusters)) => clusters,
            Some(Err(e)) => {
                warn!("Reading cpu frequency times failed: {}", e);
                return Vec::new();
            }
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        for (cluster, times) in clusters.iter().enumerate() {
            for (speed, time_ms) in times.iter().enumerate().rev() {
                let mut e = ctx.record();
                e.write_int(cluster as i32)
                    .write_int(speed as i32)
                    .write_long(*time_ms);
                out.push(e);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidCpuKind {
    /// uid, user_us, sys_us
    Time,
    /// uid, freq_index, time_ms (zero entries skipped)
    Freq,
    /// uid, cluster, time_ms
    Cluster,
    /// uid, time_ms
    Active,
}

/// Per-uid cpu accounting, one collector per breakdown
pub struct UidCpu {
    provider: Arc<dyn UidCpuProvider>,
    kind: UidCpuKind,
}

impl UidCpu {
    pub fn new(provider: Arc<dyn UidCpuProvider>, kind: UidCpuKind) -> Self {
        Self { provider, kind }
    }

    fn per_index(
        ctx: &PullContext,
        rows: Vec<(i32, Vec<i64>)>,
        skip_zero: bool,
    ) -> Vec<EventRecord> {
        let mut out = Vec::new();
        for (uid, times) in rows {
            for (index, time_ms) in times.into_iter().enumerate() {
                if skip_zero && time_ms == 0 {
                    continue;
                }
                let mut e = ctx.record();
                e.write_int(uid).write_int(index as i32).write_long(time_ms);
                out.push(e);
            }
        }
        out
    }
}

#[async_trait]
impl Collector for UidCpu {
    async fn collect(&self, ctx: &PullContext) -> Vec<EventRecord> {
        let result = match self.kind {
            UidCpuKind::Time => self.provider.uid_times().map(|rows| {
                rows.into_iter()
                    .map(|row| {
                        let mut e = ctx.record();
                        e.write_int(row.uid)
                            .write_long(row.user_us)
                            .write_long(row.system_us);
                        e
                    })
                    .collect::<Vec<_>>()
            }),
            UidCpuKind::Freq => self
                .provider
                .uid_freq_times()
                .map(|rows| Self::per_index(ctx, rows, true)),
            UidCpuKind::Cluster => self
                .provider
                .uid_cluster_times()
                .map(|rows| Self::per_index(ctx, rows, false)),
            UidCpuKind::Active => self.provider.uid_active_times().map(|rows| {
                rows.into_iter()
                    .map(|(uid, time_ms)| {
                        let mut e = ctx.record();
                        e.write_int(uid).write_long(time_ms);
                        e
                    })
                    .collect::<Vec<_>>()
            }),
        };

        result.unwrap_or_else(|e| {
            warn!("Reading per-uid cpu times ({:?}) failed: {}", self.kind, e);
            Vec::new()
        })
    }
}
