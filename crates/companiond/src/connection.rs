//! Connection lifecycle manager.
//!
//! Owns the single proxy to the stats daemon. Two states: disconnected
//! (`proxy` is `None`) and connected. The handshake, death handling, crash
//! bookkeeping and registry pushes all run under one mutex, so a death
//! notification cannot interleave with a half-finished handshake.
//!
//! Lock order: connection state, then alarm slots. The alarm scheduler never
//! holds a slot lock while calling back in here.

use crate::alarms::{AlarmListener, AlarmScheduler};
use crate::broadcasts::{BroadcastBus, BroadcastKind, OutboundIntent, SubscriptionSet};
use crate::clock::Clock;
use crate::crash_loop::CrashHistory;
use crate::daemon::{DaemonError, DaemonLocator, DeathLink, DeathRecipient, StatsDaemon};
use crate::registry::{PackageSource, RegistryUpdate, ReplaceFilter};
use companion_common::{AlarmSlot, PackageEvent, ShutdownEvent, UserAction, UserEvent};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, warn};

/// Result of a handshake attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Connected,
    /// Already connected; nothing was changed
    AlreadyConnected,
    /// The daemon could not be located
    DaemonNotFound,
    /// A post-locate step failed and the connection was torn down
    Failed,
}

struct ConnectionState {
    proxy: Option<Arc<dyn StatsDaemon>>,
    /// Held while connected; dropping it stops the death watch
    death_link: Option<DeathLink>,
    /// Bumped on every connect and teardown; stale death notices are ignored
    generation: u64,
    subscriptions: SubscriptionSet,
    replace_filter: ReplaceFilter,
    crash: CrashHistory,
}

pub struct ConnectionManager {
    locator: Arc<dyn DaemonLocator>,
    packages: Arc<dyn PackageSource>,
    alarms: Arc<AlarmScheduler>,
    bus: Arc<dyn BroadcastBus>,
    clock: Arc<dyn Clock>,
    config_dir: PathBuf,
    state: Mutex<ConnectionState>,
    self_ref: Weak<ConnectionManager>,
}

/// Ties a death notice to the connection generation it was registered for
struct DaemonDeathRecipient {
    manager: Weak<ConnectionManager>,
    generation: u64,
}

impl DeathRecipient for DaemonDeathRecipient {
    fn daemon_died(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_daemon_death(self.generation);
        }
    }
}

pub struct ConnectionDeps {
    pub locator: Arc<dyn DaemonLocator>,
    pub packages: Arc<dyn PackageSource>,
    pub alarms: Arc<AlarmScheduler>,
    pub bus: Arc<dyn BroadcastBus>,
    pub clock: Arc<dyn Clock>,
    pub config_dir: PathBuf,
    pub crash_history: CrashHistory,
}

impl ConnectionManager {
    /// Build the manager and register it as the alarm listener
    pub fn new(deps: ConnectionDeps) -> Arc<Self> {
        let manager = Arc::new_cyclic(|self_ref| ConnectionManager {
            locator: deps.locator,
            packages: deps.packages,
            alarms: deps.alarms,
            bus: deps.bus,
            clock: deps.clock,
            config_dir: deps.config_dir,
            state: Mutex::new(ConnectionState {
                proxy: None,
                death_link: None,
                generation: 0,
                subscriptions: SubscriptionSet::default(),
                replace_filter: ReplaceFilter::new(),
                crash: deps.crash_history,
            }),
            self_ref: self_ref.clone(),
        });

        let listener: Weak<dyn AlarmListener> = manager.self_ref.clone();
        manager.alarms.bind_listener(listener);
        manager
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().proxy.is_some()
    }

    /// Connect to the daemon: readiness call, death link, subscriptions and
    /// a full registry push, all under the state lock.
    pub fn handshake(&self) -> HandshakeOutcome {
        let mut state = self.lock();
        if state.proxy.is_some() {
            error!("Handshake requested while already connected to the stats daemon; ignoring");
            return HandshakeOutcome::AlreadyConnected;
        }

        let daemon = match self.locator.locate() {
            Some(daemon) => daemon,
            None => {
                warn!("Stats daemon not found; staying disconnected");
                return HandshakeOutcome::DaemonNotFound;
            }
        };

        if let Err(e) = daemon.companion_ready() {
            warn!("Stats daemon readiness call failed: {}", e);
            self.forget_everything_locked(&mut state);
            return HandshakeOutcome::Failed;
        }

        state.generation += 1;
        state.proxy = Some(Arc::clone(&daemon));

        let recipient = Arc::new(DaemonDeathRecipient {
            manager: self.self_ref.clone(),
            generation: state.generation,
        });
        match daemon.link_to_death(recipient) {
            Ok(link) => state.death_link = Some(link),
            Err(e) => {
                warn!("Failed to register for stats daemon death: {}", e);
                self.forget_everything_locked(&mut state);
                return HandshakeOutcome::Failed;
            }
        }

        state.subscriptions.subscribe_all();

        let snapshot = self.packages.snapshot();
        if let Err(e) = daemon.inform_all_uid_data(&snapshot) {
            warn!("Initial registry push failed: {}", e);
            self.daemon_failed_locked(&mut state);
            return HandshakeOutcome::Failed;
        }
        info!(
            "Connected to stats daemon; sent {} registry entries",
            snapshot.len()
        );
        drop(state);

        if let Err(e) = self.bus.send(&OutboundIntent::StatsdStarted) {
            warn!("Could not announce stats daemon start: {}", e);
        }
        HandshakeOutcome::Connected
    }

    /// Death notice for the connection of `generation`
    pub fn on_daemon_death(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.proxy.is_none() {
            debug!("Ignoring stale stats daemon death notice (generation {})", generation);
            return;
        }
        info!("Stats daemon died");
        self.daemon_failed_locked(&mut state);
    }

    /// Crash bookkeeping followed by teardown
    fn daemon_failed_locked(&self, state: &mut ConnectionState) {
        let now = self.clock.elapsed_realtime_ms();
        let wall = self.clock.wall_ms();
        if let Some(name) = state.crash.record_death(now, wall, &self.config_dir) {
            warn!("Crash loop detected; removed stored config {}", name);
        }
        self.forget_everything_locked(state);
    }

    fn forget_everything_locked(&self, state: &mut ConnectionState) {
        state.proxy = None;
        state.death_link = None;
        state.generation += 1;
        state.subscriptions.clear();
        state.replace_filter.clear();
        self.alarms.cancel_all();
        info!("Forgot stats daemon connection state");
    }

    /// Run a registry push against the live proxy; failures count as a death
    fn push_locked<F>(&self, state: &mut ConnectionState, what: &str, push: F)
    where
        F: FnOnce(&dyn StatsDaemon) -> Result<(), DaemonError>,
    {
        let Some(daemon) = state.proxy.clone() else {
            warn!("No stats daemon connected; dropping {}", what);
            return;
        };
        if let Err(e) = push(daemon.as_ref()) {
            warn!("Failed to deliver {} to stats daemon: {}", what, e);
            self.daemon_failed_locked(state);
        }
    }

    /// Push a full registry snapshot on request
    pub fn trigger_registry_snapshot(&self) {
        let mut state = self.lock();
        let snapshot = self.packages.snapshot();
        self.push_locked(&mut state, "registry snapshot", |d| {
            d.inform_all_uid_data(&snapshot)
        });
    }

    pub fn on_package_event(&self, event: &PackageEvent) {
        let mut state = self.lock();
        if !state.subscriptions.is_subscribed(BroadcastKind::PackageChanges) {
            debug!("Not subscribed to package changes; ignoring {:?}", event.action);
            return;
        }
        if state.proxy.is_none() {
            warn!("No stats daemon connected; dropping package update");
            return;
        }

        let Some(update) = state.replace_filter.filter(event) else {
            debug!("Suppressed transient {:?} of {}", event.action, event.package);
            return;
        };

        match update {
            RegistryUpdate::Installed { package, uid } => {
                let Some(version) = self.packages.version_of(&package, uid) else {
                    warn!("No installed version for {} (uid {})", package, uid);
                    return;
                };
                self.push_locked(&mut state, "package update", |d| {
                    d.inform_one_package(&package, uid, version)
                });
            }
            RegistryUpdate::Removed { package, uid } => {
                self.push_locked(&mut state, "package removal", |d| {
                    d.inform_one_package_removed(&package, uid)
                });
            }
        }
    }

    pub fn on_user_event(&self, event: &UserEvent) {
        let mut state = self.lock();
        if !state.subscriptions.is_subscribed(BroadcastKind::UserChanges) {
            debug!("Not subscribed to user changes; ignoring user {}", event.user_id);
            return;
        }
        let snapshot = self.packages.snapshot();
        let what = match event.action {
            UserAction::Initialize => "registry snapshot for new user",
            UserAction::Removed => "registry snapshot for removed user",
        };
        self.push_locked(&mut state, what, |d| d.inform_all_uid_data(&snapshot));
    }

    pub fn on_shutdown_event(&self, event: &ShutdownEvent) {
        if !event.should_report() {
            debug!("Ignoring background shutdown broadcast");
            return;
        }
        let daemon = {
            let state = self.lock();
            if !state.subscriptions.is_subscribed(BroadcastKind::Shutdown) {
                debug!("Not subscribed to shutdown; ignoring");
                return;
            }
            state.proxy.clone()
        };
        match daemon {
            Some(daemon) => {
                if let Err(e) = daemon.inform_device_shutdown() {
                    warn!("Failed to inform stats daemon of shutdown: {}", e);
                }
            }
            None => warn!("No stats daemon connected; shutdown not reported"),
        }
    }

    /// Text report of connection and crash-loop state
    pub fn dump(&self) -> String {
        let state = self.lock();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "stats daemon: {}",
            if state.proxy.is_some() { "connected" } else { "disconnected" }
        );
        let _ = writeln!(out, "recent daemon deaths: {}", state.crash.recent_deaths());
        let _ = writeln!(
            out,
            "Number of configuration files deleted: {}",
            state.crash.deleted_count()
        );
        for (ts, name) in state.crash.deleted_configs() {
            let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ts)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| ts.to_string());
            let _ = writeln!(out, "  {} {}", when, name);
        }
        for slot in AlarmSlot::ALL {
            match self.alarms.pending_wake_time(slot) {
                Some(ms) => {
                    let _ = writeln!(out, "alarm {}: {} ms", slot, ms);
                }
                None => {
                    let _ = writeln!(out, "alarm {}: unset", slot);
                }
            }
        }
        out
    }

    /// Deleted configs, oldest first
    pub fn deleted_configs(&self) -> Vec<(i64, String)> {
        self.lock()
            .crash
            .deleted_configs()
            .map(|(t, n)| (t, n.to_string()))
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }
}

impl AlarmListener for ConnectionManager {
    fn alarm_fired(&self, slot: AlarmSlot) {
        let daemon = self.lock().proxy.clone();
        let Some(daemon) = daemon else {
            warn!("Alarm {} fired but no stats daemon is connected", slot);
            return;
        };
        let result = match slot {
            AlarmSlot::Anomaly => daemon.inform_anomaly_alarm_fired(),
            AlarmSlot::Periodic => daemon.inform_periodic_alarm_fired(),
            AlarmSlot::Pulling => daemon.inform_pull_alarm_fired(),
        };
        if let Err(e) = result {
            warn!("Failed to notify stats daemon of {} alarm: {}", slot, e);
        }
    }
}
