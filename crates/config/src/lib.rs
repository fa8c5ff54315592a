//! Configuration loading, validation, and management for colloquy.
//!
//! Loads configuration from `~/.colloquy/config.toml` with environment
//! variable overrides. Validates all settings at load time.
//!
//! Tool providers come from two declarative sources, both read once at
//! startup: inline `[[tool_providers]]` tables, and an optional JSON
//! manifest in the `mcpServers` map shape many provider ecosystems use.

use colloquy_core::error::IoError;
use colloquy_core::tool::{FailurePolicy, LaunchSpec, ProviderDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.colloquy/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the engine backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Engine backend configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Session store configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Bridge configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Inline tool-provider descriptors
    #[serde(default)]
    pub tool_providers: Vec<ProviderDescriptor>,

    /// Optional JSON manifest with additional provider descriptors
    /// (`{"mcpServers": {name: {command, args, env}}}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_provider_manifest: Option<String>,

    /// What to do when a provider fails to connect
    #[serde(default)]
    pub on_provider_failure: FailurePolicy,
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("engine", &self.engine)
            .field("session", &self.session)
            .field("bridge", &self.bridge)
            .field("tool_providers", &self.tool_providers)
            .field("tool_provider_manifest", &self.tool_provider_manifest)
            .field("on_provider_failure", &self.on_provider_failure)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// System instruction given to the engine
    #[serde(default)]
    pub instruction: String,

    /// Human-readable description of what this deployment handles
    #[serde(default)]
    pub description: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per backend response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Max tool-call iterations per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".into()
}
fn default_model() -> String {
    "gemini-2.0-flash-001".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> u32 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            instruction: String::new(),
            description: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Backend: "memory" or "file"
    #[serde(default = "default_session_backend")]
    pub backend: String,

    /// Directory for the file backend (defaults to ~/.colloquy/sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_session_backend() -> String {
    "memory".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Override the fixed progress status text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_status: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            progress_status: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.colloquy/config.toml).
    ///
    /// Also checks environment variables:
    /// - `COLLOQUY_API_KEY` (highest priority)
    /// - `GEMINI_API_KEY`
    /// - `OPENAI_API_KEY`
    /// - `COLLOQUY_MODEL` / `COLLOQUY_BASE_URL` override the engine block
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("COLLOQUY_API_KEY")
                .ok()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("COLLOQUY_MODEL") {
            config.engine.model = model;
        }

        if let Ok(base_url) = std::env::var("COLLOQUY_BASE_URL") {
            config.engine.base_url = base_url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".colloquy")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.temperature < 0.0 || self.engine.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "engine.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_iterations must be at least 1".into(),
            ));
        }

        if !matches!(self.session.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "unknown session backend '{}' (expected \"memory\" or \"file\")",
                self.session.backend
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for descriptor in &self.tool_providers {
            if descriptor.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool provider name must not be empty".into(),
                ));
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate tool provider name '{}'",
                    descriptor.name
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// All configured provider descriptors: inline tables first, then the
    /// manifest's entries (sorted by name for a stable order).
    pub fn provider_descriptors(&self) -> Result<Vec<ProviderDescriptor>, IoError> {
        let mut descriptors = self.tool_providers.clone();
        if let Some(manifest) = &self.tool_provider_manifest {
            descriptors.extend(load_manifest(Path::new(manifest))?);
        }
        Ok(descriptors)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            engine: EngineConfig::default(),
            session: SessionConfig::default(),
            bridge: BridgeConfig::default(),
            tool_providers: vec![],
            tool_provider_manifest: None,
            on_provider_failure: FailurePolicy::default(),
        }
    }
}

/// Read a provider manifest in the `mcpServers` map shape:
///
/// ```json
/// {
///   "mcpServers": {
///     "sonarqube": { "command": "python", "args": ["sonar_mcp.py"], "env": {} },
///     "issues":    { "url": "http://remote-server:8080/tools" }
///   }
/// }
/// ```
///
/// An unreadable or malformed manifest is an I/O error — the descriptor
/// source is part of startup, not something to silently skip.
pub fn load_manifest(path: &Path) -> Result<Vec<ProviderDescriptor>, IoError> {
    let content = std::fs::read_to_string(path).map_err(|e| IoError::DescriptorSource {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let manifest: Manifest =
        serde_json::from_str(&content).map_err(|e| IoError::DescriptorSource {
            path: path.display().to_string(),
            reason: format!("invalid manifest: {e}"),
        })?;

    let mut names: Vec<&String> = manifest.mcp_servers.keys().collect();
    names.sort();

    let mut descriptors = Vec::with_capacity(names.len());
    for name in names {
        let entry = &manifest.mcp_servers[name];
        let launch = match entry {
            ManifestEntry::Stdio { command, args, env } => LaunchSpec::Stdio {
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
            },
            ManifestEntry::Remote { url, headers } => LaunchSpec::Remote {
                url: url.clone(),
                headers: headers.clone(),
            },
        };
        descriptors.push(ProviderDescriptor {
            name: name.clone(),
            launch,
        });
    }
    Ok(descriptors)
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, ManifestEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestEntry {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Remote {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors. Fatal at startup — the caller logs the cause and
/// aborts initialization.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

impl From<ConfigError> for colloquy_core::Error {
    fn from(e: ConfigError) -> Self {
        colloquy_core::Error::Config {
            message: e.to_string(),
        }
    }
}
