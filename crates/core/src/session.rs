//! Session domain types and the SessionStore trait.
//!
//! A session is the identifier-keyed unit of conversational state: an
//! ordered log of turns plus an arbitrary state blob owned by the reasoning
//! engine. Sessions are created on first reference to an unknown key and
//! live for the process lifetime — eviction, if any, belongs to an external
//! collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::IoError;

/// Opaque identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One completed query-response exchange within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Unique turn ID (assigned by the bridge, used in logs)
    pub id: String,

    /// The caller's query
    pub query: String,

    /// The final response text the caller received
    pub response: String,

    /// When the turn completed
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A persistent, identifier-keyed unit of conversational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The opaque key this session is registered under
    pub key: SessionKey,

    /// Ordered log of completed turns
    pub turns: Vec<TurnRecord>,

    /// Arbitrary state blob owned by the reasoning engine.
    /// The store never inspects it; the bridge replaces it wholesale when
    /// the engine's final output carries a new one.
    #[serde(default)]
    pub state: serde_json::Value,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was recorded
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session with empty initial state.
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            turns: Vec::new(),
            state: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a completed turn.
    pub fn record_turn(&mut self, record: TurnRecord) {
        self.updated_at = Utc::now();
        self.turns.push(record);
    }

    /// Replace the engine-owned state blob.
    pub fn replace_state(&mut self, state: serde_json::Value) {
        self.updated_at = Utc::now();
        self.state = state;
    }
}

/// Shared handle to a live session.
///
/// Two `resolve_or_create` calls with the same key return clones of the
/// same handle, so both observe the same state.
pub type SessionHandle = Arc<RwLock<Session>>;

/// The Session Store trait.
///
/// Implementations: in-memory (process lifetime), file-backed JSON
/// (durable). The map from key to session must support safe concurrent
/// get-or-create: resolving two concurrent requests for the same unknown
/// key must not create two sessions — exactly one creation wins and the
/// other observes the winner's session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The store name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Get the session for `key`, or create it with empty initial state.
    ///
    /// Idempotent: calling twice with the same key returns handles to the
    /// same session. A query is never rejected for an unknown key.
    async fn resolve_or_create(&self, key: &SessionKey) -> std::result::Result<SessionHandle, IoError>;

    /// Get the session for `key` if it exists.
    async fn get(&self, key: &SessionKey) -> std::result::Result<Option<SessionHandle>, IoError>;

    /// Durability point for the session under `key`.
    ///
    /// No-op for stores without external persistence.
    async fn persist(&self, key: &SessionKey) -> std::result::Result<(), IoError>;

    /// Number of live sessions (diagnostics).
    async fn count(&self) -> std::result::Result<usize, IoError>;
}
