//! Shared types for the stats companion and its control client.

pub mod error;
pub mod event;
pub mod host;
pub mod rpc;

pub use error::CompanionError;
pub use event::{DecodeError, EventRecord, TypedValue};
pub use host::{
    AlarmSlot, PackageAction, PackageEvent, ShutdownAction, ShutdownEvent, UserAction, UserEvent,
};
pub use rpc::{Method, Request, Response, ResponseData, RpcError, SubscriberBroadcast};

/// Crate version, reported by `dump`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default inbound socket
pub const DEFAULT_SOCKET_PATH: &str = "/run/stats-companion/companion.sock";
