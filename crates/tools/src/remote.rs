//! Remote provider transport — the same three operations (`initialize`,
//! `tools/list`, `tools/call`) as JSON-RPC over HTTP POST against a
//! configured endpoint.

use async_trait::async_trait;
use colloquy_core::error::ProviderConnectError;
use colloquy_core::tool::{ToolError, ToolHandle};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::connection::{ProviderConnection, ProviderRpc, handles_from_listing};

/// A connection to one remote tool provider endpoint.
pub struct RemoteConnection {
    name: String,
    client: Arc<RemoteClient>,
    handles: Vec<Arc<dyn ToolHandle>>,
}

impl std::fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("name", &self.name)
            .field("handles", &self.handles.len())
            .finish()
    }
}

impl RemoteConnection {
    /// Connect to the endpoint and complete the handshake.
    pub async fn open(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        handshake_timeout: Duration,
    ) -> Result<Self, ProviderConnectError> {
        debug!(provider = %name, %url, "Connecting remote tool provider");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderConnectError::Launch {
                provider: name.to_string(),
                reason: e.to_string(),
            })?;

        let client = Arc::new(RemoteClient {
            provider: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            headers: headers.clone(),
            http,
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
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
                return Err(ProviderConnectError::HandshakeRejected {
                    provider: name.to_string(),
                    reason,
                });
            }
            Err(_) => {
                return Err(ProviderConnectError::Timeout {
                    provider: name.to_string(),
                    timeout_secs: handshake_timeout.as_secs(),
                });
            }
        };

        let rpc: Arc<dyn ProviderRpc> = Arc::clone(&client) as Arc<dyn ProviderRpc>;
        let handles = handles_from_listing(&listing, &rpc);
        debug!(provider = %name, tools = handles.len(), "Remote provider handshake complete");

        Ok(Self {
            name: name.to_string(),
            client,
            handles,
        })
    }
}

#[async_trait]
impl ProviderConnection for RemoteConnection {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn handles(&self) -> Vec<Arc<dyn ToolHandle>> {
        self.handles.clone()
    }

    async fn close(&mut self) -> Result<(), ProviderConnectError> {
        // No process to reap — mark the channel closed so outstanding
        // handles stop hitting the endpoint.
        self.client.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct RemoteClient {
    provider: String,
    url: String,
    headers: HashMap<String, String>,
    http: reqwest::Client,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl RemoteClient {
    async fn raw_request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(provider = %self.provider, %method, "remote request");

        let mut request = self.http.post(&self.url).json(&body);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("endpoint returned {status}: {text}"));
        }

        let message: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))?;

        if let Some(error) = message.get("error") {
            let reason = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(reason.to_string());
        }

        Ok(message.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl ProviderRpc for RemoteClient {
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

        self.raw_request(method, params)
            .await
            .map_err(|reason| ToolError::InvocationFailed { tool_name, reason })
    }
}
