//! RPC Server - Unix socket server for the companion's inbound methods

use crate::service::{Caller, StatsCompanion};
use anyhow::{Context, Result};
use companion_common::{Method, Request, Response, RpcError};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Bind the inbound socket, replacing a stale one
pub async fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(socket_dir) = socket_path.parent() {
        tokio::fs::create_dir_all(socket_dir)
            .await
            .context("Failed to create socket directory")?;
    }

    // Remove old socket if it exists
    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind Unix socket {}", socket_path.display()))?;

    // Any local user may connect; methods check peer credentials themselves.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o666))
            .context("Failed to set socket permissions")?;
    }

    info!("RPC server listening on {}", socket_path.display());
    Ok(listener)
}

/// Accept connections until the listener fails permanently
pub async fn run(listener: UnixListener, companion: Arc<StatsCompanion>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let companion = Arc::clone(&companion);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, companion).await {
                        error!("Connection handler error: {:#}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(stream: UnixStream, companion: Arc<StatsCompanion>) -> Result<()> {
    let cred = stream
        .peer_cred()
        .context("Failed to read peer credentials")?;
    let caller = Caller {
        uid: cred.uid(),
        pid: cred.pid(),
    };
    debug!("Client connected: uid {} pid {:?}", caller.uid, caller.pid);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read from socket")?;

        if bytes_read == 0 {
            // Connection closed
            break;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                warn!("Invalid request JSON: {}", e);
                continue;
            }
        };

        let response = handle_request(request.id, request.method, caller, &companion).await;

        let response_json = serde_json::to_string(&response)? + "\n";
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
    }

    Ok(())
}

/// Handle a single request
async fn handle_request(
    id: u64,
    method: Method,
    caller: Caller,
    companion: &StatsCompanion,
) -> Response {
    let name = method.name();
    let result = companion.handle(method, caller).await.map_err(|e| {
        debug!("{} failed: {}", name, e);
        RpcError::from(e)
    });
    Response { id, result }
}
