//! Host broadcast plumbing.
//!
//! Outbound: intents the companion sends on the host bus (data fetch,
//! subscriber notification, daemon started). Inbound: which host event kinds
//! the companion is currently subscribed to.

use companion_common::SubscriberBroadcast;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("broadcast bus unavailable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("could not encode intent: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An intent delivered on the host bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundIntent {
    /// Tell a data consumer a report is ready to fetch
    DataFetch {
        target: String,
        last_report_time_ns: i64,
    },
    /// Tell a subscriber one of its rules fired
    SubscriberFired {
        target: String,
        config_uid: i32,
        config_key: i64,
        subscription_id: i64,
        subscription_rule_id: i64,
        cookies: Vec<String>,
        dimension: serde_json::Value,
    },
    /// Announce that the stats daemon is up and connected
    StatsdStarted,
}

impl From<SubscriberBroadcast> for OutboundIntent {
    fn from(b: SubscriberBroadcast) -> Self {
        OutboundIntent::SubscriberFired {
            target: b.intent_sender,
            config_uid: b.config_uid,
            config_key: b.config_key,
            subscription_id: b.subscription_id,
            subscription_rule_id: b.subscription_rule_id,
            cookies: b.cookies,
            dimension: b.dimension,
        }
    }
}

pub trait BroadcastBus: Send + Sync {
    fn send(&self, intent: &OutboundIntent) -> Result<(), BroadcastError>;
}

/// Writes one JSON line per intent to the bus socket
pub struct SocketBroadcastBus {
    path: PathBuf,
}

impl SocketBroadcastBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BroadcastBus for SocketBroadcastBus {
    fn send(&self, intent: &OutboundIntent) -> Result<(), BroadcastError> {
        let mut stream = UnixStream::connect(&self.path)?;
        stream.set_write_timeout(Some(Duration::from_secs(2)))?;
        let line = serde_json::to_string(intent)? + "\n";
        stream.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Host event kinds the companion listens for while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastKind {
    /// Package add/remove/replace
    PackageChanges,
    /// User initialize/removed
    UserChanges,
    /// Reboot/shutdown
    Shutdown,
}

impl BroadcastKind {
    pub const ALL: [BroadcastKind; 3] = [
        BroadcastKind::PackageChanges,
        BroadcastKind::UserChanges,
        BroadcastKind::Shutdown,
    ];
}

#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    active: HashSet<BroadcastKind>,
}

impl SubscriptionSet {
    pub fn subscribe_all(&mut self) {
        self.active.extend(BroadcastKind::ALL);
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }

    pub fn is_subscribed(&self, kind: BroadcastKind) -> bool {
        self.active.contains(&kind)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    #[test]
    fn test_subscription_set() {
        let mut subs = SubscriptionSet::default();
        assert!(!subs.is_subscribed(BroadcastKind::Shutdown));
        subs.subscribe_all();
        subs.subscribe_all();
        assert_eq!(subs.len(), 3);
        subs.clear();
        assert!(subs.is_empty());
    }

    #[test]
    fn test_socket_bus_writes_json_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bus.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let bus = SocketBroadcastBus::new(&path);
        bus.send(&OutboundIntent::DataFetch {
            target: "com.example/.Uploader".into(),
            last_report_time_ns: 77,
        })
        .unwrap();

        let (stream, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["action"], "data_fetch");
        assert_eq!(value["last_report_time_ns"], 77);
    }

    #[test]
    fn test_socket_bus_unavailable() {
        let dir = TempDir::new().unwrap();
        let bus = SocketBroadcastBus::new(dir.path().join("missing.sock"));
        let err = bus.send(&OutboundIntent::StatsdStarted).unwrap_err();
        assert!(matches!(err, BroadcastError::Unavailable(_)));
    }

    #[test]
    fn test_subscriber_intent_from_request() {
        let intent: OutboundIntent = SubscriberBroadcast {
            intent_sender: "com.example/.Alerts".into(),
            config_uid: 10_001,
            config_key: 9,
            subscription_id: 3,
            subscription_rule_id: 4,
            cookies: vec!["a".into()],
            dimension: serde_json::json!({"field": 1}),
        }
        .into();
        match intent {
            OutboundIntent::SubscriberFired { target, cookies, .. } => {
                assert_eq!(target, "com.example/.Alerts");
                assert_eq!(cookies, vec!["a".to_string()]);
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }
}
