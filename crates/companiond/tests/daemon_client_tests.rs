//! Socket daemon client against an in-process fake daemon.

mod common;

use common::{FakePackages, RecordingBus};
use companiond::alarms::AlarmScheduler;
use companiond::clock::ManualClock;
use companiond::connection::{ConnectionDeps, ConnectionManager};
use companiond::crash_loop::CrashHistory;
use companiond::daemon::{
    DaemonCall, DaemonError, DaemonLocator, DaemonReply, DaemonRequest, DeathRecipient,
    SocketDaemonLocator, StatsDaemon,
};
use companiond::registry::RegistrySnapshot;
use companiond::HandshakeOutcome;
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Handle;

#[derive(Clone)]
struct FakeServer {
    calls: Arc<Mutex<Vec<DaemonCall>>>,
    watches: Arc<Mutex<Vec<UnixStream>>>,
    closed_watches: Arc<AtomicUsize>,
    refuse: fn(&DaemonCall) -> bool,
}

impl FakeServer {
    /// Refuses device shutdown only
    fn start(path: &Path) -> Self {
        Self::start_refusing(path, |call| *call == DaemonCall::DeviceShutdown)
    }

    fn start_refusing(path: &Path, refuse: fn(&DaemonCall) -> bool) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let server = FakeServer {
            calls: Arc::default(),
            watches: Arc::default(),
            closed_watches: Arc::default(),
            refuse,
        };
        let accept = server.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                let conn = accept.clone();
                thread::spawn(move || conn.serve(stream));
            }
        });
        server
    }

    fn serve(&self, stream: UnixStream) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let mut line = String::new();
        let mut watching = false;
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let request: DaemonRequest = serde_json::from_str(&line).unwrap();
            self.calls.lock().unwrap().push(request.call.clone());

            if request.call == DaemonCall::Watch {
                self.watches.lock().unwrap().push(writer.try_clone().unwrap());
                watching = true;
                continue;
            }
            let ok = !(self.refuse)(&request.call);
            let reply = DaemonReply {
                id: request.id,
                ok,
                error: (!ok).then(|| "refused".to_string()),
            };
            let json = serde_json::to_string(&reply).unwrap();
            if writeln!(writer, "{}", json).is_err() {
                break;
            }
        }
        if watching {
            self.closed_watches.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for_watches(&self, count: usize) {
        for _ in 0..500 {
            if self.watches.lock().unwrap().len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("daemon never saw {} watches", count);
    }

    fn wait_for_closed_watches(&self, count: usize) {
        for _ in 0..500 {
            if self.closed_watches.load(Ordering::SeqCst) >= count {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!(
            "only {} of {} watches closed",
            self.closed_watches.load(Ordering::SeqCst),
            count
        );
    }

    /// Simulate the daemon exiting: drop every watch connection
    fn kill_watches(&self) {
        for watch in self.watches.lock().unwrap().drain(..) {
            let _ = watch.shutdown(Shutdown::Both);
        }
    }

    fn calls(&self) -> Vec<DaemonCall> {
        self.calls.lock().unwrap().clone()
    }
}

struct ChannelRecipient(Mutex<mpsc::Sender<()>>);

impl DeathRecipient for ChannelRecipient {
    fn daemon_died(&self) {
        let _ = self.0.lock().unwrap().send(());
    }
}

#[test]
fn test_locate_without_daemon() {
    let dir = TempDir::new().unwrap();
    let locator = SocketDaemonLocator::new(dir.path().join("statsd.sock"));
    assert!(locator.locate().is_none());
}

#[test]
fn test_calls_reach_daemon_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("statsd.sock");
    let server = FakeServer::start(&path);

    let daemon = SocketDaemonLocator::new(&path).locate().unwrap();
    daemon.companion_ready().unwrap();

    let mut snapshot = RegistrySnapshot::default();
    snapshot.push(10_001, 3, "com.example.mail");
    daemon.inform_all_uid_data(&snapshot).unwrap();
    daemon
        .inform_one_package("com.example.maps", 10_002, 41)
        .unwrap();
    daemon.inform_pull_alarm_fired().unwrap();

    assert_eq!(
        server.calls(),
        vec![
            DaemonCall::CompanionReady,
            DaemonCall::AllUidData {
                uids: vec![10_001],
                versions: vec![3],
                names: vec!["com.example.mail".to_string()],
            },
            DaemonCall::OnePackage {
                package: "com.example.maps".to_string(),
                uid: 10_002,
                version: 41,
            },
            DaemonCall::PullAlarmFired,
        ]
    );
}

#[test]
fn test_rejected_call_is_remote_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("statsd.sock");
    let _server = FakeServer::start(&path);

    let daemon = SocketDaemonLocator::new(&path).locate().unwrap();
    let err = daemon.inform_device_shutdown().unwrap_err();
    assert!(matches!(err, DaemonError::Remote(msg) if msg == "refused"));

    // The connection stays usable after a remote rejection.
    daemon.inform_anomaly_alarm_fired().unwrap();
}

#[test]
fn test_death_watch_fires_once_daemon_exits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("statsd.sock");
    let server = FakeServer::start(&path);

    let daemon = SocketDaemonLocator::new(&path).locate().unwrap();
    let (tx, rx) = mpsc::channel();
    let _link = daemon
        .link_to_death(Arc::new(ChannelRecipient(Mutex::new(tx))))
        .unwrap();
    assert!(rx.try_recv().is_err());

    server.wait_for_watches(1);
    server.kill_watches();

    rx.recv_timeout(Duration::from_secs(5))
        .expect("death recipient was not invoked");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_dropping_link_closes_watch_quietly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("statsd.sock");
    let server = FakeServer::start(&path);

    let daemon = SocketDaemonLocator::new(&path).locate().unwrap();
    let (tx, rx) = mpsc::channel();
    let link = daemon
        .link_to_death(Arc::new(ChannelRecipient(Mutex::new(tx))))
        .unwrap();
    server.wait_for_watches(1);

    drop(link);

    server.wait_for_closed_watches(1);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[tokio::test]
async fn test_failed_handshakes_do_not_leak_watches() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("statsd.sock");
    let server = FakeServer::start_refusing(&path, |call| {
        matches!(call, DaemonCall::AllUidData { .. })
    });

    let clock = Arc::new(ManualClock::new(60_000, 1_700_000_000_000));
    let manager = ConnectionManager::new(ConnectionDeps {
        locator: Arc::new(SocketDaemonLocator::new(&path)),
        packages: Arc::new(FakePackages),
        alarms: Arc::new(AlarmScheduler::new(clock.clone(), Handle::current())),
        bus: Arc::new(RecordingBus::default()),
        clock,
        config_dir: dir.path().join("configs"),
        crash_history: CrashHistory::default(),
    });

    for _ in 0..5 {
        assert_eq!(manager.handshake(), HandshakeOutcome::Failed);
    }

    server.wait_for_closed_watches(5);
    assert!(!manager.is_connected());
}
