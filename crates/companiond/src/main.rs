//! Stats companion daemon
//!
//! Serves metric pulls and alarms to the stats daemon and keeps it fed with
//! package registry updates.

use anyhow::Result;
use clap::Parser;
use companion_common::VERSION;
use companiond::broadcasts::SocketBroadcastBus;
use companiond::clock::SystemClock;
use companiond::daemon::SocketDaemonLocator;
use companiond::providers::Providers;
use companiond::registry::ManifestPackageSource;
use companiond::{rpc_server, CompanionConfig, Environment, HandshakeOutcome, StatsCompanion};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "companiond", version, about = "Stats daemon companion")]
struct Args {
    /// Config file (defaults to /etc/stats-companion/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the inbound RPC socket path
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Stats companion v{} starting", VERSION);

    let mut config = match &args.config {
        Some(path) => CompanionConfig::load_or_default(path),
        None => CompanionConfig::load(),
    };
    if let Some(socket) = args.socket {
        config.paths.socket_path = socket;
    }

    let env = Environment {
        clock: Arc::new(SystemClock),
        providers: Providers::linux(),
        locator: Arc::new(SocketDaemonLocator::new(config.paths.daemon_socket_path.clone())),
        packages: Arc::new(ManifestPackageSource::new(config.paths.package_manifest_path.clone())),
        bus: Arc::new(SocketBroadcastBus::new(config.paths.broadcast_socket_path.clone())),
    };
    let companion = Arc::new(StatsCompanion::new(&config, env, Handle::current()));

    // The daemon may already be up; otherwise it calls NotifyReady when it starts.
    let connection = companion.connection();
    match tokio::task::spawn_blocking(move || connection.handshake()).await {
        Ok(HandshakeOutcome::Connected) => info!("Connected to stats daemon at startup"),
        Ok(outcome) => info!("Stats daemon not connected at startup: {:?}", outcome),
        Err(e) => warn!("Startup handshake task failed: {}", e),
    }

    let listener = rpc_server::bind(&config.paths.socket_path).await?;
    info!("Stats companion ready");

    tokio::select! {
        result = rpc_server::run(listener, Arc::clone(&companion)) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down gracefully");
        }
    }

    companion.alarms().cancel_all();
    let _ = std::fs::remove_file(&config.paths.socket_path);
    Ok(())
}
