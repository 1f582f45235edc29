//! Stats companion - host-side helper for the stats daemon.
//!
//! Answers metric pulls, keeps three alarm slots for the daemon, and owns
//! the connection to it: handshake, death handling, crash-loop mitigation
//! and uid/package registry pushes.

pub mod alarms;
pub mod broadcasts;
pub mod clock;
pub mod config;
pub mod connection;
pub mod crash_loop;
pub mod daemon;
pub mod providers;
pub mod pull;
pub mod registry;
pub mod rpc_server;
pub mod service;

pub use config::CompanionConfig;
pub use connection::{ConnectionManager, HandshakeOutcome};
pub use service::{Caller, Environment, StatsCompanion};
