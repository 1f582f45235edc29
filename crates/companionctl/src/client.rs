//! RPC Client - Unix socket client for the companion

use anyhow::{Context, Result};
use companion_common::{Method, Request, Response, ResponseData, DEFAULT_SOCKET_PATH};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Environment variable naming the companion socket
pub const SOCKET_ENV: &str = "COMPANION_SOCKET";

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
/// Handshakes make blocking calls into the stats daemon
const CALL_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl RpcClient {
    /// Socket path: explicit flag, then $COMPANION_SOCKET, then the default
    pub fn discover_socket_path(explicit_path: Option<&str>) -> String {
        if let Some(path) = explicit_path {
            return path.to_string();
        }

        if let Ok(path) = std::env::var(SOCKET_ENV) {
            return path;
        }

        DEFAULT_SOCKET_PATH.to_string()
    }

    pub async fn connect(socket_path: Option<&str>) -> Result<Self> {
        let path = Self::discover_socket_path(socket_path);

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&path))
            .await
            .with_context(|| format!("Timed out connecting to {}", path))?
            .with_context(|| {
                format!(
                    "Failed to connect to companion at {}. Is companiond running?",
                    path
                )
            })?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send a request and wait for its response
    pub async fn call(&mut self, method: Method) -> Result<ResponseData> {
        tokio::time::timeout(CALL_TIMEOUT, self.call_inner(method))
            .await
            .with_context(|| format!("RPC call timed out after {:?}", CALL_TIMEOUT))?
    }

    async fn call_inner(&mut self, method: Method) -> Result<ResponseData> {
        let id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);
        let request = Request { id, method };

        let request_json = serde_json::to_string(&request)? + "\n";
        self.writer
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to send request")?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read response")?;
        if read == 0 {
            anyhow::bail!("Companion closed the connection");
        }

        let response: Response = serde_json::from_str(&line).context("Failed to parse response")?;
        if response.id != id {
            anyhow::bail!("Response ID mismatch");
        }

        response.result.map_err(|e| anyhow::anyhow!("{}", e))
    }
}
