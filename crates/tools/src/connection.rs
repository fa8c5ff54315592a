//! Provider connection traits and the transport-dispatching connector.
//!
//! A `ProviderConnection` is a live, resource-holding link to one tool
//! provider. It yields named tool handles and must be released exactly
//! once. The lifecycle manager only sees these traits; the stdio and
//! remote transports implement them.

use async_trait::async_trait;
use colloquy_core::error::ProviderConnectError;
use colloquy_core::tool::{LaunchSpec, ProviderDescriptor, ToolError, ToolHandle, ToolOutput};
use std::sync::Arc;
use std::time::Duration;

use crate::remote::RemoteConnection;
use crate::stdio::StdioConnection;

/// A live link to one tool provider.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    /// The descriptor name this connection was opened for.
    fn provider_name(&self) -> &str;

    /// The tool handles this provider exposes. Handles are owned by the
    /// connection; the registry shares them.
    fn handles(&self) -> Vec<Arc<dyn ToolHandle>>;

    /// Release the connection. Called exactly once by the owning scope.
    async fn close(&mut self) -> Result<(), ProviderConnectError>;
}

/// Opens provider connections from descriptors.
///
/// The lifecycle manager is generic over this seam so tests can inject
/// counting fakes.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Box<dyn ProviderConnection>, ProviderConnectError>;
}

/// The wire seam shared by both transports: one JSON-RPC request out, one
/// result value back.
#[async_trait]
pub(crate) trait ProviderRpc: Send + Sync {
    fn is_closed(&self) -> bool;

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}

/// A tool handle backed by a provider's RPC channel.
pub(crate) struct ProviderToolHandle {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) parameters: serde_json::Value,
    pub(crate) rpc: Arc<dyn ProviderRpc>,
}

#[async_trait]
impl ToolHandle for ProviderToolHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        if self.rpc.is_closed() {
            return Err(ToolError::ProviderGone {
                tool_name: self.name.clone(),
            });
        }

        let result = self
            .rpc
            .request(
                "tools/call",
                serde_json::json!({
                    "name": self.name,
                    "arguments": arguments,
                }),
            )
            .await?;

        Ok(match result {
            serde_json::Value::String(content) => ToolOutput {
                content,
                data: None,
            },
            value => ToolOutput {
                content: value.to_string(),
                data: Some(value),
            },
        })
    }
}

/// Parse a `tools/list` result into handles bound to `rpc`.
pub(crate) fn handles_from_listing(
    listing: &serde_json::Value,
    rpc: &Arc<dyn ProviderRpc>,
) -> Vec<Arc<dyn ToolHandle>> {
    let Some(tools) = listing.get("tools").and_then(|t| t.as_array()) else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name")?.as_str()?.to_string();
            let description = tool
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("")
                .to_string();
            let parameters = tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "object"}));
            Some(Arc::new(ProviderToolHandle {
                name,
                description,
                parameters,
                rpc: Arc::clone(rpc),
            }) as Arc<dyn ToolHandle>)
        })
        .collect()
}

/// The default connector: dispatches on the descriptor's launch spec.
pub struct TransportConnector {
    handshake_timeout: Duration,
    tool_timeout: Duration,
}

impl TransportConnector {
    pub fn new() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            tool_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }
}

impl Default for TransportConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderConnector for TransportConnector {
    async fn connect(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Box<dyn ProviderConnection>, ProviderConnectError> {
        match &descriptor.launch {
            LaunchSpec::Stdio { command, args, env } => {
                let connection = StdioConnection::open(
                    &descriptor.name,
                    command,
                    args,
                    env,
                    self.handshake_timeout,
                    self.tool_timeout,
                )
                .await?;
                Ok(Box::new(connection))
            }
            LaunchSpec::Remote { url, headers } => {
                let connection = RemoteConnection::open(
                    &descriptor.name,
                    url,
                    headers,
                    self.handshake_timeout,
                )
                .await?;
                Ok(Box::new(connection))
            }
        }
    }
}
