//! Stdio provider transport — a local subprocess speaking
//! newline-delimited JSON-RPC 2.0 over its standard streams.
//!
//! The connection spawns the descriptor's command with its argument and
//! environment overrides, performs an `initialize` handshake under a
//! timeout, discovers tools via `tools/list`, and kills the child when
//! closed.

use async_trait::async_trait;
use colloquy_core::error::ProviderConnectError;
use colloquy_core::tool::{ToolError, ToolHandle};
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::connection::{ProviderConnection, ProviderRpc, handles_from_listing};

/// A connection to one stdio tool provider.
pub struct StdioConnection {
    name: String,
    client: Arc<StdioClient>,
    handles: Vec<Arc<dyn ToolHandle>>,
}

impl std::fmt::Debug for StdioConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioConnection")
            .field("name", &self.name)
            .field("handles", &self.handles.len())
            .finish()
    }
}

impl StdioConnection {
    /// Spawn the provider process and complete the handshake.
    pub async fn open(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        handshake_timeout: Duration,
        tool_timeout: Duration,
    ) -> Result<Self, ProviderConnectError> {
        debug!(provider = %name, %command, "Spawning stdio tool provider");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderConnectError::Launch {
                provider: name.to_string(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        let client = Arc::new(StdioClient {
            provider: name.to_string(),
            tool_timeout,
            closed: AtomicBool::new(false),
            io: Mutex::new(StdioChannel {
                child,
                stdin,
                lines: BufReader::new(stdout).lines(),
                next_id: 1,
            }),
        });

        let handshake = async {
            client
                .raw_request(
                    "initialize",
                    json!({
                        "protocolVersion": "2024-11-05",
                        "clientInfo": {
                            "name": "colloquy",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                        "capabilities": {},
                    }),
                )
                .await?;
            client.raw_request("tools/list", json!({})).await
        };

        let listing = match tokio::time::timeout(handshake_timeout, handshake).await {
            Ok(Ok(listing)) => listing,
            Ok(Err(reason)) => {
                client.shutdown().await;
                return Err(ProviderConnectError::HandshakeRejected {
                    provider: name.to_string(),
                    reason,
                });
            }
            Err(_) => {
                client.shutdown().await;
                return Err(ProviderConnectError::Timeout {
                    provider: name.to_string(),
                    timeout_secs: handshake_timeout.as_secs(),
                });
            }
        };

        let rpc: Arc<dyn ProviderRpc> = Arc::clone(&client) as Arc<dyn ProviderRpc>;
        let handles = handles_from_listing(&listing, &rpc);
        debug!(provider = %name, tools = handles.len(), "Stdio provider handshake complete");

        Ok(Self {
            name: name.to_string(),
            client,
            handles,
        })
    }
}

#[async_trait]
impl ProviderConnection for StdioConnection {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn handles(&self) -> Vec<Arc<dyn ToolHandle>> {
        self.handles.clone()
    }

    async fn close(&mut self) -> Result<(), ProviderConnectError> {
        self.client.shutdown().await;
        Ok(())
    }
}

struct StdioChannel {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

/// The live JSON-RPC channel to one subprocess.
struct StdioClient {
    provider: String,
    tool_timeout: Duration,
    closed: AtomicBool,
    io: Mutex<StdioChannel>,
}

impl StdioClient {
    /// Send one request and wait for its response line.
    ///
    /// Lines that are not the matching response (notifications, other ids)
    /// are skipped.
    async fn raw_request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, String> {
        let mut io = self.io.lock().await;

        let id = io.next_id;
        io.next_id += 1;

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = request.to_string();
        line.push('\n');
        trace!(provider = %self.provider, %method, "stdio request");

        io.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("write failed: {e}"))?;
        io.stdin
            .flush()
            .await
            .map_err(|e| format!("flush failed: {e}"))?;

        loop {
            let Some(line) = io
                .lines
                .next_line()
                .await
                .map_err(|e| format!("read failed: {e}"))?
            else {
                return Err("connection closed by provider".to_string());
            };

            let message: serde_json::Value = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!(provider = %self.provider, error = %e, "Skipping unparseable provider output");
                    continue;
                }
            };

            if message.get("id").and_then(|v| v.as_u64()) != Some(id) {
                continue;
            }

            if let Some(error) = message.get("error") {
                let reason = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                return Err(reason.to_string());
            }

            return Ok(message.get("result").cloned().unwrap_or(serde_json::Value::Null));
        }
    }

    /// Kill the child and mark the channel closed. Idempotent.
    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut io = self.io.lock().await;
        if let Err(e) = io.child.kill().await {
            debug!(provider = %self.provider, error = %e, "Provider process already gone");
        }
    }
}

#[async_trait]
impl ProviderRpc for StdioClient {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool_name = params
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or(method)
            .to_string();

        match tokio::time::timeout(self.tool_timeout, self.raw_request(method, params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(reason)) => Err(ToolError::InvocationFailed { tool_name, reason }),
            Err(_) => Err(ToolError::Timeout {
                tool_name,
                timeout_secs: self.tool_timeout.as_secs(),
            }),
        }
    }
}
