//! One collector per supported tag.

pub mod controller;
pub mod cpu;
pub mod network;
pub mod procstats;
pub mod storage;
pub mod system;

use super::tags;
use super::{Collector, MissingProvider, PullDispatcher};
use crate::clock::Clock;
use crate::config::CompanionConfig;
use crate::providers::{Providers, Transport};
use std::sync::Arc;

fn or_missing<P: ?Sized>(
    provider: &Option<Arc<P>>,
    what: &'static str,
    build: impl FnOnce(Arc<P>) -> Arc<dyn Collector>,
) -> Arc<dyn Collector> {
    match provider {
        Some(p) => build(Arc::clone(p)),
        None => Arc::new(MissingProvider { what }),
    }
}

/// Wire every supported tag into `dispatcher`
pub fn register_all(
    dispatcher: &mut PullDispatcher,
    clock: Arc<dyn Clock>,
    providers: &Providers,
    config: &CompanionConfig,
) {
    let timeout = config.pull.controller_timeout();
    let paths = &config.paths;

    for (tag, transport, by_fg_bg) in [
        (tags::WIFI_BYTES_TRANSFER, Transport::Wifi, false),
        (tags::WIFI_BYTES_TRANSFER_BY_FG_BG, Transport::Wifi, true),
        (tags::MOBILE_BYTES_TRANSFER, Transport::Mobile, false),
        (tags::MOBILE_BYTES_TRANSFER_BY_FG_BG, Transport::Mobile, true),
    ] {
        let collector = or_missing(&providers.network, "network stats", |p| {
            Arc::new(network::NetworkBytes::new(p, transport, by_fg_bg))
        });
        dispatcher.register(tag, collector);
    }

    // Both bluetooth tags share one query so controller requests are serialized.
    let bluetooth = providers
        .bluetooth
        .clone()
        .map(|p| Arc::new(controller::BluetoothQuery::new(p, timeout)));
    dispatcher.register(
        tags::BLUETOOTH_BYTES_TRANSFER,
        or_missing(&bluetooth, "bluetooth controller", |q| {
            Arc::new(controller::BluetoothBytes::new(q))
        }),
    );
    dispatcher.register(
        tags::BLUETOOTH_ACTIVITY_INFO,
        or_missing(&bluetooth, "bluetooth controller", |q| {
            Arc::new(controller::BluetoothActivity::new(q))
        }),
    );
    dispatcher.register(
        tags::WIFI_ACTIVITY_INFO,
        or_missing(&providers.wifi, "wifi controller", |p| {
            Arc::new(controller::WifiActivity::new(p, timeout))
        }),
    );
    dispatcher.register(
        tags::MODEM_ACTIVITY_INFO,
        or_missing(&providers.modem, "modem controller", |p| {
            Arc::new(controller::ModemActivity::new(p, timeout))
        }),
    );

    dispatcher.register(
        tags::KERNEL_WAKELOCK,
        or_missing(&providers.wakelocks, "kernel wakelock", |p| {
            Arc::new(system::KernelWakelocks::new(p))
        }),
    );
    dispatcher.register(
        tags::CPU_TIME_PER_FREQ,
        or_missing(&providers.cpu_freq, "cpu frequency", |p| {
            Arc::new(cpu::CpuTimePerFreq::new(p))
        }),
    );
    for (tag, kind) in [
        (tags::CPU_TIME_PER_UID, cpu::UidCpuKind::Time),
        (tags::CPU_TIME_PER_UID_FREQ, cpu::UidCpuKind::Freq),
        (tags::CPU_CLUSTER_TIME, cpu::UidCpuKind::Cluster),
        (tags::CPU_ACTIVE_TIME, cpu::UidCpuKind::Active),
    ] {
        dispatcher.register(
            tag,
            or_missing(&providers.uid_cpu, "per-uid cpu", |p| {
                Arc::new(cpu::UidCpu::new(p, kind))
            }),
        );
    }

    dispatcher.register(
        tags::SYSTEM_ELAPSED_REALTIME,
        Arc::new(system::ElapsedRealtime::new(Arc::clone(&clock))),
    );
    dispatcher.register(tags::SYSTEM_UPTIME, Arc::new(system::Uptime::new(Arc::clone(&clock))));
    dispatcher.register(
        tags::PROCESS_MEMORY_STATE,
        or_missing(&providers.process_memory, "process memory", |p| {
            Arc::new(system::ProcessMemory::new(p))
        }),
    );
    dispatcher.register(
        tags::BINDER_CALLS,
        or_missing(&providers.binder, "binder stats", |p| {
            Arc::new(system::BinderCalls::new(p))
        }),
    );
    dispatcher.register(
        tags::BINDER_CALLS_EXCEPTIONS,
        or_missing(&providers.binder, "binder stats", |p| {
            Arc::new(system::BinderExceptions::new(p))
        }),
    );
    dispatcher.register(
        tags::LOOPER_STATS,
        or_missing(&providers.looper, "looper stats", |p| {
            Arc::new(system::Looper::new(p))
        }),
    );
    dispatcher.register(
        tags::NUM_FINGERPRINTS,
        or_missing(&providers.fingerprints, "fingerprint", |p| {
            Arc::new(system::NumFingerprints::new(p))
        }),
    );
    dispatcher.register(
        tags::POWER_PROFILE,
        or_missing(&providers.power_profile, "power profile", |p| {
            Arc::new(system::PowerProfile::new(p))
        }),
    );
    dispatcher.register(
        tags::DISK_IO,
        or_missing(&providers.disk_io, "disk io", |p| {
            Arc::new(system::DiskIo::new(p))
        }),
    );

    dispatcher.register(
        tags::DISK_STATS,
        Arc::new(storage::DiskStats::new(
            Arc::clone(&clock),
            paths.scratch_dir.clone(),
            providers.storage.clone(),
        )),
    );
    dispatcher.register(
        tags::DIRECTORY_USAGE,
        or_missing(&providers.fs, "filesystem stats", |p| {
            Arc::new(storage::DirectoryUsage::new(
                p,
                [
                    (tags::directory::DATA, paths.data_dir.clone()),
                    (tags::directory::CACHE, paths.cache_dir.clone()),
                    (tags::directory::SYSTEM, paths.system_dir.clone()),
                ],
            ))
        }),
    );
    dispatcher.register(
        tags::APP_SIZE,
        Arc::new(storage::AppSize::new(paths.diskstats_cache_path.clone())),
    );
    dispatcher.register(
        tags::CATEGORY_SIZE,
        Arc::new(storage::CategorySize::new(paths.diskstats_cache_path.clone())),
    );

    dispatcher.register(
        tags::PROC_STATS,
        or_missing(&providers.procstats, "procstats", |p| {
            Arc::new(procstats::ProcStats::new(p, paths.procstats_state_dir.clone()))
        }),
    );
}
