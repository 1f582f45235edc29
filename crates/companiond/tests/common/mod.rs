//! Fakes shared by the companiond integration tests.

#![allow(dead_code)]

use companiond::alarms::AlarmScheduler;
use companiond::broadcasts::{BroadcastBus, BroadcastError, OutboundIntent};
use companiond::clock::ManualClock;
use companiond::connection::{ConnectionDeps, ConnectionManager};
use companiond::crash_loop::CrashHistory;
use companiond::daemon::{DaemonError, DaemonLocator, DeathLink, DeathRecipient, StatsDaemon};
use companiond::registry::{PackageSource, RegistrySnapshot};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;

/// Records every outbound call; individual steps can be made to fail
#[derive(Default)]
pub struct FakeDaemon {
    pub calls: Mutex<Vec<String>>,
    pub fail_ready: AtomicBool,
    pub fail_link: AtomicBool,
    pub fail_pushes: AtomicBool,
    /// Death links released so far
    pub unlinks: Arc<AtomicUsize>,
    recipient: Mutex<Option<Arc<dyn DeathRecipient>>>,
}

impl FakeDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn push(&self, call: String) -> Result<(), DaemonError> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(DaemonError::Remote("push rejected".into()));
        }
        self.record(call);
        Ok(())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Fire the most recently linked death recipient
    pub fn kill(&self) {
        let recipient = self.recipient.lock().unwrap().take();
        if let Some(recipient) = recipient {
            recipient.daemon_died();
        }
    }
}

impl StatsDaemon for FakeDaemon {
    fn companion_ready(&self) -> Result<(), DaemonError> {
        if self.fail_ready.load(Ordering::SeqCst) {
            return Err(DaemonError::Remote("not ready".into()));
        }
        self.record("ready");
        Ok(())
    }

    fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>) -> Result<DeathLink, DaemonError> {
        if self.fail_link.load(Ordering::SeqCst) {
            return Err(DaemonError::Remote("cannot link".into()));
        }
        *self.recipient.lock().unwrap() = Some(recipient);
        self.record("link");
        let unlinks = Arc::clone(&self.unlinks);
        Ok(DeathLink::new(move || {
            unlinks.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn inform_anomaly_alarm_fired(&self) -> Result<(), DaemonError> {
        self.record("anomaly_alarm");
        Ok(())
    }

    fn inform_pull_alarm_fired(&self) -> Result<(), DaemonError> {
        self.record("pull_alarm");
        Ok(())
    }

    fn inform_periodic_alarm_fired(&self) -> Result<(), DaemonError> {
        self.record("periodic_alarm");
        Ok(())
    }

    fn inform_all_uid_data(&self, snapshot: &RegistrySnapshot) -> Result<(), DaemonError> {
        self.push(format!("all_uid_data:{}", snapshot.len()))
    }

    fn inform_one_package(&self, package: &str, uid: i32, version: i64) -> Result<(), DaemonError> {
        self.push(format!("one_package:{}:{}:{}", package, uid, version))
    }

    fn inform_one_package_removed(&self, package: &str, uid: i32) -> Result<(), DaemonError> {
        self.push(format!("package_removed:{}:{}", package, uid))
    }

    fn inform_device_shutdown(&self) -> Result<(), DaemonError> {
        self.record("shutdown");
        Ok(())
    }
}

/// Hands out the same fake daemon, or nothing once `present` is cleared
pub struct FakeLocator {
    pub daemon: Arc<FakeDaemon>,
    pub present: AtomicBool,
}

impl FakeLocator {
    pub fn new(daemon: Arc<FakeDaemon>) -> Arc<Self> {
        Arc::new(Self {
            daemon,
            present: AtomicBool::new(true),
        })
    }
}

impl DaemonLocator for FakeLocator {
    fn locate(&self) -> Option<Arc<dyn StatsDaemon>> {
        if self.present.load(Ordering::SeqCst) {
            Some(self.daemon.clone())
        } else {
            None
        }
    }
}

/// Two packages for user 0; every package is at version 7
pub struct FakePackages;

impl PackageSource for FakePackages {
    fn snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.push(10_001, 7, "com.example.mail");
        snapshot.push(10_002, 7, "com.example.maps");
        snapshot
    }

    fn version_of(&self, _package: &str, _uid: i32) -> Option<i64> {
        Some(7)
    }
}

#[derive(Default)]
pub struct RecordingBus {
    pub sent: Mutex<Vec<OutboundIntent>>,
}

impl BroadcastBus for RecordingBus {
    fn send(&self, intent: &OutboundIntent) -> Result<(), BroadcastError> {
        self.sent.lock().unwrap().push(intent.clone());
        Ok(())
    }
}

pub struct Harness {
    pub daemon: Arc<FakeDaemon>,
    pub locator: Arc<FakeLocator>,
    pub clock: Arc<ManualClock>,
    pub alarms: Arc<AlarmScheduler>,
    pub bus: Arc<RecordingBus>,
    pub manager: Arc<ConnectionManager>,
}

/// Connection manager wired to fakes; must run inside a tokio runtime
pub fn harness(config_dir: &Path) -> Harness {
    let daemon = FakeDaemon::new();
    let locator = FakeLocator::new(daemon.clone());
    let clock = Arc::new(ManualClock::new(60_000, 1_700_000_000_000));
    let alarms = Arc::new(AlarmScheduler::new(clock.clone(), Handle::current()));
    let bus = Arc::new(RecordingBus::default());
    let manager = ConnectionManager::new(ConnectionDeps {
        locator: locator.clone(),
        packages: Arc::new(FakePackages),
        alarms: alarms.clone(),
        bus: bus.clone(),
        clock: clock.clone(),
        config_dir: config_dir.to_path_buf(),
        crash_history: CrashHistory::default(),
    });
    Harness {
        daemon,
        locator,
        clock,
        alarms,
        bus,
        manager,
    }
}
