//! In-memory session store — process-lifetime sessions, no persistence.

use async_trait::async_trait;
use colloquy_core::error::IoError;
use colloquy_core::session::{Session, SessionHandle, SessionKey, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// An in-memory session store.
///
/// Get-or-create runs under a single write lock, so two concurrent
/// resolutions of the same unknown key observe exactly one session.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn resolve_or_create(&self, key: &SessionKey) -> Result<SessionHandle, IoError> {
        // Fast path: the session already exists.
        if let Some(handle) = self.sessions.read().await.get(key.as_str()) {
            return Ok(Arc::clone(handle));
        }

        // Get-or-create under the write lock — not get-then-create. A racing
        // creator may have won between the read above and this point; the
        // entry API makes exactly one creation win either way.
        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(key.as_str().to_string())
            .or_insert_with(|| {
                debug!(session_key = %key, "Creating session");
                Arc::new(RwLock::new(Session::new(key.clone())))
            });
        Ok(Arc::clone(handle))
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionHandle>, IoError> {
        Ok(self.sessions.read().await.get(key.as_str()).map(Arc::clone))
    }

    async fn persist(&self, _key: &SessionKey) -> Result<(), IoError> {
        // Nothing to flush — sessions live for the process lifetime.
        Ok(())
    }

    async fn count(&self) -> Result<usize, IoError> {
        Ok(self.sessions.read().await.len())
    }
}
