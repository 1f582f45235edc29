//! Outbound calls into the stats daemon.
//!
//! `StatsDaemon` is the narrow contract the companion needs from the daemon.
//! `SocketDaemon` speaks it as newline-delimited JSON over a Unix socket; the
//! death notification is a dedicated "watch" connection whose EOF means the
//! daemon went away. Dropping the `DeathLink` closes the watch without
//! notifying anyone.

use crate::registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Transport timeout for a single daemon call
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("stats daemon not found at {0}")]
    NotFound(String),

    #[error("stats daemon rejected call: {0}")]
    Remote(String),

    #[error("IO error talking to stats daemon: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed reply from stats daemon: {0}")]
    Protocol(String),
}

/// Observer invoked once when the daemon behind a proxy dies
pub trait DeathRecipient: Send + Sync {
    fn daemon_died(&self);
}

/// A live death registration. Dropping it unlinks the recipient, which is
/// then never invoked.
pub struct DeathLink {
    unlink: Option<Box<dyn FnOnce() + Send>>,
}

impl DeathLink {
    pub fn new(unlink: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unlink: Some(Box::new(unlink)),
        }
    }
}

impl Drop for DeathLink {
    fn drop(&mut self) {
        if let Some(unlink) = self.unlink.take() {
            unlink();
        }
    }
}

/// Calls the companion makes into the daemon
pub trait StatsDaemon: Send + Sync {
    /// Blocking readiness call that completes the handshake
    fn companion_ready(&self) -> Result<(), DaemonError>;

    /// Register `recipient` to be told when this daemon dies, for as long
    /// as the returned link is held. The recipient is never invoked from
    /// inside this call.
    fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>) -> Result<DeathLink, DaemonError>;

    fn inform_anomaly_alarm_fired(&self) -> Result<(), DaemonError>;
    fn inform_pull_alarm_fired(&self) -> Result<(), DaemonError>;
    fn inform_periodic_alarm_fired(&self) -> Result<(), DaemonError>;

    fn inform_all_uid_data(&self, snapshot: &RegistrySnapshot) -> Result<(), DaemonError>;
    fn inform_one_package(&self, package: &str, uid: i32, version: i64)
        -> Result<(), DaemonError>;
    fn inform_one_package_removed(&self, package: &str, uid: i32) -> Result<(), DaemonError>;

    fn inform_device_shutdown(&self) -> Result<(), DaemonError>;
}

/// Finds the daemon, if it is running
pub trait DaemonLocator: Send + Sync {
    fn locate(&self) -> Option<Arc<dyn StatsDaemon>>;
}

/// Wire form of an outbound call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum DaemonCall {
    CompanionReady,
    Watch,
    AnomalyAlarmFired,
    PullAlarmFired,
    PeriodicAlarmFired,
    AllUidData {
        uids: Vec<i32>,
        versions: Vec<i64>,
        names: Vec<String>,
    },
    OnePackage {
        package: String,
        uid: i32,
        version: i64,
    },
    OnePackageRemoved {
        package: String,
        uid: i32,
    },
    DeviceShutdown,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub id: u64,
    pub call: DaemonCall,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonReply {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Connection {
    fn open(path: &Path) -> Result<Self, DaemonError> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(CALL_TIMEOUT))?;
        stream.set_write_timeout(Some(CALL_TIMEOUT))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn send(&mut self, request: &DaemonRequest) -> Result<(), DaemonError> {
        let line = serde_json::to_string(request)
            .map_err(|e| DaemonError::Protocol(e.to_string()))?
            + "\n";
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn call(&mut self, request: &DaemonRequest) -> Result<(), DaemonError> {
        self.send(request)?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(DaemonError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "daemon closed the connection",
            )));
        }
        let reply: DaemonReply =
            serde_json::from_str(&line).map_err(|e| DaemonError::Protocol(e.to_string()))?;
        if reply.id != request.id {
            return Err(DaemonError::Protocol(format!(
                "reply id {} does not match request id {}",
                reply.id, request.id
            )));
        }
        if reply.ok {
            Ok(())
        } else {
            Err(DaemonError::Remote(
                reply.error.unwrap_or_else(|| "unspecified error".to_string()),
            ))
        }
    }
}

/// Unix-socket proxy for a running daemon
pub struct SocketDaemon {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl SocketDaemon {
    /// Connect now; fails if the daemon is not listening
    pub fn connect(path: &Path) -> Result<Self, DaemonError> {
        let conn = Connection::open(path).map_err(|e| match e {
            DaemonError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                DaemonError::NotFound(path.display().to_string())
            }
            other => other,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(Some(conn)),
            next_id: AtomicU64::new(1),
        })
    }

    fn call(&self, call: DaemonCall) -> Result<(), DaemonError> {
        let request = DaemonRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            call,
        };

        let mut guard = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() {
            *guard = Some(Connection::open(&self.path)?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| DaemonError::NotFound(self.path.display().to_string()))?;

        let result = conn.call(&request);
        if matches!(result, Err(DaemonError::Io(_)) | Err(DaemonError::Protocol(_))) {
            // Stream state is unknown; reconnect on the next call.
            *guard = None;
        }
        result
    }
}

impl StatsDaemon for SocketDaemon {
    fn companion_ready(&self) -> Result<(), DaemonError> {
        self.call(DaemonCall::CompanionReady)
    }

    fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>) -> Result<DeathLink, DaemonError> {
        let mut watch = Connection::open(&self.path)?;
        watch.send(&DaemonRequest {
            id: 0,
            call: DaemonCall::Watch,
        })?;
        let Connection { mut reader, writer } = watch;
        // The watch connection idles until the daemon exits.
        reader.get_ref().set_read_timeout(None)?;

        let unlinked = Arc::new(AtomicBool::new(false));
        let released = Arc::clone(&unlinked);
        let path = self.path.clone();
        thread::Builder::new()
            .name("daemon-death-watch".to_string())
            .spawn(move || {
                let mut sink = Vec::new();
                loop {
                    sink.clear();
                    match reader.read_until(b'\n', &mut sink) {
                        Ok(0) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            debug!("Death watch read error: {}", e);
                            break;
                        }
                    }
                }
                if released.load(Ordering::SeqCst) {
                    debug!("Death watch on {} released", path.display());
                    return;
                }
                info!("Stats daemon at {} went away", path.display());
                recipient.daemon_died();
            })?;

        Ok(DeathLink::new(move || {
            unlinked.store(true, Ordering::SeqCst);
            if let Err(e) = writer.shutdown(Shutdown::Both) {
                debug!("Closing death watch: {}", e);
            }
        }))
    }

    fn inform_anomaly_alarm_fired(&self) -> Result<(), DaemonError> {
        self.call(DaemonCall::AnomalyAlarmFired)
    }

    fn inform_pull_alarm_fired(&self) -> Result<(), DaemonError> {
        self.call(DaemonCall::PullAlarmFired)
    }

    fn inform_periodic_alarm_fired(&self) -> Result<(), DaemonError> {
        self.call(DaemonCall::PeriodicAlarmFired)
    }

    fn inform_all_uid_data(&self, snapshot: &RegistrySnapshot) -> Result<(), DaemonError> {
        self.call(DaemonCall::AllUidData {
            uids: snapshot.uids.clone(),
            versions: snapshot.versions.clone(),
            names: snapshot.names.clone(),
        })
    }

    fn inform_one_package(
        &self,
        package: &str,
        uid: i32,
        version: i64,
    ) -> Result<(), DaemonError> {
        self.call(DaemonCall::OnePackage {
            package: package.to_string(),
            uid,
            version,
        })
    }

    fn inform_one_package_removed(&self, package: &str, uid: i32) -> Result<(), DaemonError> {
        self.call(DaemonCall::OnePackageRemoved {
            package: package.to_string(),
            uid,
        })
    }

    fn inform_device_shutdown(&self) -> Result<(), DaemonError> {
        self.call(DaemonCall::DeviceShutdown)
    }
}

/// Locates the daemon by connecting to its socket
pub struct SocketDaemonLocator {
    path: PathBuf,
}

impl SocketDaemonLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DaemonLocator for SocketDaemonLocator {
    fn locate(&self) -> Option<Arc<dyn StatsDaemon>> {
        match SocketDaemon::connect(&self.path) {
            Ok(daemon) => Some(Arc::new(daemon)),
            Err(e) => {
                warn!("Could not reach stats daemon: {}", e);
                None
            }
        }
    }
}
