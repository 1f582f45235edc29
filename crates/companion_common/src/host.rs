//! Host-side vocabulary: alarm slots and the system broadcasts the companion
//! reacts to (package changes, user changes, shutdown).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three independently schedulable wake timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmSlot {
    /// Anomaly-detection check
    Anomaly,
    /// Periodic subscriber check
    Periodic,
    /// Pull trigger
    Pulling,
}

impl AlarmSlot {
    pub const ALL: [AlarmSlot; 3] = [AlarmSlot::Anomaly, AlarmSlot::Periodic, AlarmSlot::Pulling];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSlot::Anomaly => "anomaly",
            AlarmSlot::Periodic => "periodic",
            AlarmSlot::Pulling => "pulling",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            AlarmSlot::Anomaly => 0,
            AlarmSlot::Periodic => 1,
            AlarmSlot::Pulling => 2,
        }
    }
}

impl fmt::Display for AlarmSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anomaly" => Ok(AlarmSlot::Anomaly),
            "periodic" => Ok(AlarmSlot::Periodic),
            "pulling" | "pull" => Ok(AlarmSlot::Pulling),
            other => Err(format!("unknown alarm slot '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageAction {
    Added,
    Removed,
    Replaced,
}

/// A package install/remove/replace broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEvent {
    pub action: PackageAction,
    pub package: String,
    pub uid: i32,
    /// Set on the remove/add halves of an upgrade
    #[serde(default)]
    pub replacing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Initialize,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    pub action: UserAction,
    pub user_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownAction {
    Reboot,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownEvent {
    pub action: ShutdownAction,
    /// Shutdown initiated from the foreground (user-visible) path
    #[serde(default)]
    pub foreground: bool,
}

impl ShutdownEvent {
    /// Only reboots and user-initiated shutdowns are reported to the daemon
    pub fn should_report(&self) -> bool {
        match self.action {
            ShutdownAction::Reboot => true,
            ShutdownAction::Shutdown => self.foreground,
        }
    }
}
