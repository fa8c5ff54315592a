//! Error types for the colloquy domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all colloquy operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors (fatal at startup) ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Tool-provider connection errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderConnectError),

    // --- Reasoning-engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- I/O errors (session persistence, descriptor loading) ---
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A tool provider failed to establish (or keep) a usable connection.
#[derive(Debug, Clone, Error)]
pub enum ProviderConnectError {
    #[error("Provider '{provider}' failed to launch: {reason}")]
    Launch { provider: String, reason: String },

    #[error("Provider '{provider}' rejected the handshake: {reason}")]
    HandshakeRejected { provider: String, reason: String },

    #[error("Provider '{provider}' timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("Provider '{provider}' connection closed: {reason}")]
    ConnectionClosed { provider: String, reason: String },
}

/// The reasoning engine failed mid-turn.
///
/// These terminate the current turn only — the session is left as it was
/// at the end of the prior turn.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Engine request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Engine invocation failed: {0}")]
    Invocation(String),

    #[error("Engine stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Engine invocation cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),
}

/// Session persistence or descriptor loading failed.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    #[error("Session storage failed: {0}")]
    SessionStorage(String),

    #[error("Descriptor source unreadable at {path}: {reason}")]
    DescriptorSource { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderConnectError::HandshakeRejected {
            provider: "sonarqube".into(),
            reason: "unsupported protocol revision".into(),
        });
        assert!(err.to_string().contains("sonarqube"));
        assert!(err.to_string().contains("handshake"));
    }

    #[test]
    fn engine_error_displays_correctly() {
        let err = Error::Engine(EngineError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn io_error_carries_path() {
        let err = Error::Io(IoError::DescriptorSource {
            path: "/etc/colloquy/mcp.json".into(),
            reason: "permission denied".into(),
        });
        assert!(err.to_string().contains("/etc/colloquy/mcp.json"));
    }
}
