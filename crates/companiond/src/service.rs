//! The companion service: inbound methods routed to their components.

use crate::alarms::AlarmScheduler;
use crate::broadcasts::{BroadcastBus, OutboundIntent};
use crate::clock::Clock;
use crate::config::CompanionConfig;
use crate::connection::{ConnectionDeps, ConnectionManager, HandshakeOutcome};
use crate::crash_loop::CrashHistory;
use crate::daemon::DaemonLocator;
use crate::providers::Providers;
use crate::pull::PullDispatcher;
use crate::registry::PackageSource;
use companion_common::{CompanionError, Method, ResponseData, VERSION};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Identity of an inbound caller, from the socket's peer credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub pid: Option<i32>,
}

impl Caller {
    /// This process
    pub fn local() -> Self {
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        Self {
            uid,
            pid: Some(std::process::id() as i32),
        }
    }
}

/// External collaborators the companion is wired to
pub struct Environment {
    pub clock: Arc<dyn Clock>,
    pub providers: Providers,
    pub locator: Arc<dyn DaemonLocator>,
    pub packages: Arc<dyn PackageSource>,
    pub bus: Arc<dyn BroadcastBus>,
}

pub struct StatsCompanion {
    dispatcher: PullDispatcher,
    connection: Arc<ConnectionManager>,
    alarms: Arc<AlarmScheduler>,
    bus: Arc<dyn BroadcastBus>,
    authorized_uids: HashSet<u32>,
    own_pid: i32,
    started: Instant,
}

impl StatsCompanion {
    /// Must be called with a tokio runtime `runtime` that outlives the service
    pub fn new(config: &CompanionConfig, env: Environment, runtime: Handle) -> Self {
        let dispatcher =
            PullDispatcher::with_defaults(Arc::clone(&env.clock), &env.providers, config);
        let alarms = Arc::new(AlarmScheduler::new(Arc::clone(&env.clock), runtime));
        let connection = ConnectionManager::new(ConnectionDeps {
            locator: env.locator,
            packages: env.packages,
            alarms: Arc::clone(&alarms),
            bus: Arc::clone(&env.bus),
            clock: env.clock,
            config_dir: config.paths.config_dir.clone(),
            crash_history: CrashHistory::from_config(&config.crash_loop),
        });
        info!(
            "Stats companion ready: {} pull tags supported",
            dispatcher.supported_tags().len()
        );

        Self {
            dispatcher,
            connection,
            alarms,
            bus: env.bus,
            authorized_uids: config.access.authorized_uids.iter().copied().collect(),
            own_pid: std::process::id() as i32,
            started: Instant::now(),
        }
    }

    pub fn connection(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connection)
    }

    pub fn alarms(&self) -> &AlarmScheduler {
        &self.alarms
    }

    pub fn dispatcher(&self) -> &PullDispatcher {
        &self.dispatcher
    }

    /// Same process, root, or an authorized uid
    pub fn authorize(&self, caller: &Caller) -> Result<(), CompanionError> {
        if caller.pid == Some(self.own_pid)
            || caller.uid == 0
            || self.authorized_uids.contains(&caller.uid)
        {
            return Ok(());
        }
        Err(CompanionError::PermissionDenied(caller.uid))
    }

    /// Serve one inbound method for `caller`
    pub async fn handle(
        &self,
        method: Method,
        caller: Caller,
    ) -> Result<ResponseData, CompanionError> {
        if method.requires_permission() {
            if let Err(e) = self.authorize(&caller) {
                warn!("Rejected {} from uid {}", method.name(), caller.uid);
                return Err(e);
            }
        }
        debug!("Handling {} for uid {}", method.name(), caller.uid);

        match method {
            Method::Pull { tag } => {
                let records = self
                    .dispatcher
                    .pull(tag)
                    .await
                    .map_err(|unknown| CompanionError::UnknownTag(unknown.0))?;
                Ok(ResponseData::Records(records))
            }

            Method::SetAlarm { slot, wake_time_ms } => {
                self.alarms.set_exact(slot, wake_time_ms);
                Ok(ResponseData::Ok)
            }

            Method::CancelAlarm { slot } => {
                self.alarms.cancel(slot);
                Ok(ResponseData::Ok)
            }

            Method::NotifyReady => match self.with_connection(|c| c.handshake()).await? {
                HandshakeOutcome::Connected | HandshakeOutcome::AlreadyConnected => {
                    Ok(ResponseData::Ok)
                }
                HandshakeOutcome::DaemonNotFound => Err(CompanionError::DaemonUnavailable(
                    "stats daemon not found".to_string(),
                )),
                HandshakeOutcome::Failed => Err(CompanionError::DaemonUnavailable(
                    "handshake with stats daemon failed".to_string(),
                )),
            },

            Method::TriggerRegistrySnapshot => {
                if !self.connection.is_connected() {
                    return Err(CompanionError::DaemonUnavailable(
                        "no stats daemon connected".to_string(),
                    ));
                }
                self.with_connection(|c| c.trigger_registry_snapshot()).await?;
                Ok(ResponseData::Ok)
            }

            Method::SendDataBroadcast {
                intent_sender,
                last_report_time_ns,
            } => {
                self.send_intent(OutboundIntent::DataFetch {
                    target: intent_sender,
                    last_report_time_ns,
                })
                .await?;
                Ok(ResponseData::Ok)
            }

            Method::SendSubscriberBroadcast(broadcast) => {
                self.send_intent(broadcast.into()).await?;
                Ok(ResponseData::Ok)
            }

            Method::PackageBroadcast(event) => {
                self.with_connection(move |c| c.on_package_event(&event)).await?;
                Ok(ResponseData::Ok)
            }

            Method::UserBroadcast(event) => {
                self.with_connection(move |c| c.on_user_event(&event)).await?;
                Ok(ResponseData::Ok)
            }

            Method::ShutdownBroadcast(event) => {
                self.with_connection(move |c| c.on_shutdown_event(&event)).await?;
                Ok(ResponseData::Ok)
            }

            Method::Dump => Ok(ResponseData::Dump(self.dump())),
        }
    }

    /// Daemon calls block; run them off the async workers
    async fn with_connection<T, F>(&self, f: F) -> Result<T, CompanionError>
    where
        T: Send + 'static,
        F: FnOnce(&ConnectionManager) -> T + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || f(&connection))
            .await
            .map_err(|e| CompanionError::Internal(format!("connection task failed: {}", e)))
    }

    /// Delivery failures are logged, not returned to the sender
    async fn send_intent(&self, intent: OutboundIntent) -> Result<(), CompanionError> {
        let bus = Arc::clone(&self.bus);
        let sent = tokio::task::spawn_blocking(move || bus.send(&intent))
            .await
            .map_err(|e| CompanionError::Internal(format!("broadcast task failed: {}", e)))?;
        if let Err(e) = sent {
            warn!("Failed to send broadcast: {}", e);
        }
        Ok(())
    }

    pub fn dump(&self) -> String {
        format!(
            "stats companion v{}\nuptime: {}s\nsupported pull tags: {}\n{}",
            VERSION,
            self.started.elapsed().as_secs(),
            self.dispatcher.supported_tags().len(),
            self.connection.dump()
        )
    }
}
