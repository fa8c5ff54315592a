//! Tool capabilities — handles, provider descriptors, and the registry.
//!
//! Tools are capabilities exposed by external providers. The bridge and
//! engine see them only through `ToolHandle`: a name, an invocation
//! contract, and nothing else about the provider behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors from invoking a tool handle.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool invocation failed: {tool_name} — {reason}")]
    InvocationFailed { tool_name: String, reason: String },

    #[error("Tool provider is gone: {tool_name}")]
    ProviderGone { tool_name: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

/// A tool definition advertised to the reasoning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Human-readable output content
    pub content: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A capability exposed by a connected tool provider.
///
/// Each handle is owned by exactly one provider connection; the registry
/// holds shared references. Invoking a handle after its connection closed
/// fails with `ToolError::ProviderGone`.
#[async_trait]
pub trait ToolHandle: Send + Sync {
    /// The unique name of this tool (e.g., "list_projects").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the engine).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Invoke the tool with the given arguments.
    async fn invoke(&self, arguments: serde_json::Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this handle into a definition for the engine.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

// --- Provider descriptors ---

/// How to reach one tool provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum LaunchSpec {
    /// Spawn a local subprocess and speak over its stdio.
    Stdio {
        command: String,

        #[serde(default)]
        args: Vec<String>,

        /// Environment overrides applied on top of the inherited env
        #[serde(default)]
        env: HashMap<String, String>,
    },

    /// Connect to a remote endpoint.
    Remote {
        url: String,

        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Declarative description of one tool provider.
///
/// Read once at startup; immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique provider name
    pub name: String,

    #[serde(flatten)]
    pub launch: LaunchSpec,
}

impl ProviderDescriptor {
    /// A stdio descriptor with no args or env overrides.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            launch: LaunchSpec::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
            },
        }
    }
}

/// What the lifecycle manager does when a provider fails to connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the failure, keep connecting the remaining providers, and
    /// hand out the partial capability set.
    #[default]
    BestEffort,

    /// Release everything already opened and fail the load.
    AbortOnFirstFailure,
}

// --- Capability registry ---

/// The merged, read-only view of tool handles handed to the engine.
///
/// Built exactly once by the lifecycle manager after all descriptors have
/// been attempted; immutable afterward — no tool appears or disappears
/// mid-conversation. Safe to share across concurrent sessions without
/// synchronization.
pub struct CapabilityRegistry {
    tools: HashMap<String, Arc<dyn ToolHandle>>,
}

impl CapabilityRegistry {
    /// An empty registry (no providers configured, or none connected).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Merge handles into a registry. On a name collision the first handle
    /// wins; later ones are logged and skipped.
    pub fn from_handles(handles: impl IntoIterator<Item = Arc<dyn ToolHandle>>) -> Self {
        let mut tools: HashMap<String, Arc<dyn ToolHandle>> = HashMap::new();
        for handle in handles {
            let name = handle.name().to_string();
            if tools.contains_key(&name) {
                warn!(tool = %name, "Duplicate tool name across providers; keeping the first");
                continue;
            }
            tools.insert(name, handle);
        }
        Self { tools }
    }

    /// Get a handle by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandle>> {
        self.tools.get(name)
    }

    /// All tool definitions (for advertising to the engine).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Invoke a tool by name.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(arguments).await
    }

    /// All registered tool names, sorted for stable output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
