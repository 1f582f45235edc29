//! Inbound RPC protocol: newline-delimited JSON over a Unix socket.

use crate::error::CompanionError;
use crate::event::EventRecord;
use crate::host::{AlarmSlot, PackageEvent, ShutdownEvent, UserEvent};
use serde::{Deserialize, Serialize};

/// Request from a client to the companion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
}

/// Response from the companion to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, RpcError>,
}

/// Request methods
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Method {
    /// Collect the current value(s) of one metric
    Pull { tag: i32 },

    /// Arm a slot; replaces any pending wake for that slot
    SetAlarm { slot: AlarmSlot, wake_time_ms: i64 },

    /// Disarm a slot; no-op when unset
    CancelAlarm { slot: AlarmSlot },

    /// The daemon announces it is up and wants the handshake
    NotifyReady,

    /// Push a full uid/package snapshot to the daemon
    TriggerRegistrySnapshot,

    /// Ask a data consumer to fetch a report
    SendDataBroadcast {
        intent_sender: String,
        last_report_time_ns: i64,
    },

    /// Notify a subscriber that one of its rules fired
    SendSubscriberBroadcast(SubscriberBroadcast),

    /// Host event delivery
    PackageBroadcast(PackageEvent),
    UserBroadcast(UserEvent),
    ShutdownBroadcast(ShutdownEvent),

    /// Human-readable state report
    Dump,
}

impl Method {
    /// Broadcast sends are open to any caller
    pub fn requires_permission(&self) -> bool {
        !matches!(
            self,
            Method::SendDataBroadcast { .. } | Method::SendSubscriberBroadcast(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::Pull { .. } => "pull",
            Method::SetAlarm { .. } => "set_alarm",
            Method::CancelAlarm { .. } => "cancel_alarm",
            Method::NotifyReady => "notify_ready",
            Method::TriggerRegistrySnapshot => "trigger_registry_snapshot",
            Method::SendDataBroadcast { .. } => "send_data_broadcast",
            Method::SendSubscriberBroadcast(_) => "send_subscriber_broadcast",
            Method::PackageBroadcast(_) => "package_broadcast",
            Method::UserBroadcast(_) => "user_broadcast",
            Method::ShutdownBroadcast(_) => "shutdown_broadcast",
            Method::Dump => "dump",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberBroadcast {
    pub intent_sender: String,
    pub config_uid: i32,
    pub config_key: i64,
    pub subscription_id: i64,
    pub subscription_rule_id: i64,
    #[serde(default)]
    pub cookies: Vec<String>,
    #[serde(default)]
    pub dimension: serde_json::Value,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResponseData {
    Ok,
    Records(Vec<EventRecord>),
    Dump(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl From<CompanionError> for RpcError {
    fn from(err: CompanionError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}
