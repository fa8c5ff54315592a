//! File-based session store — one JSON document per session.
//!
//! Storage location: `<dir>/<key>.json`, with unsafe key characters
//! replaced and a stable hash suffix appended so distinct keys never
//! share a file.
//!
//! Sessions load from disk on first resolution and flush on `persist`.
//! This gives fast reads with durable writes, and keeps the store
//! human-inspectable.

use async_trait::async_trait;
use colloquy_core::error::IoError;
use colloquy_core::session::{Session, SessionHandle, SessionKey, SessionStore};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A file-backed session store.
///
/// Loaded sessions are cached; `resolve_or_create` runs under one write
/// lock so a racing resolution of the same unknown key still creates
/// exactly one session.
pub struct FileSessionStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first flush.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Default path: `~/.colloquy/sessions`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".colloquy").join("sessions")
    }

    fn document_path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key.as_str())))
    }

    /// Load a session document if it exists. A document that exists but
    /// cannot be read or parsed is an error, not a fresh session —
    /// silently recreating it would drop history.
    fn load_document(path: &Path, key: &SessionKey) -> Result<Option<Session>, IoError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            IoError::SessionStorage(format!("failed to read session '{key}': {e}"))
        })?;
        let session: Session = serde_json::from_str(&content).map_err(|e| {
            IoError::SessionStorage(format!("corrupt session document for '{key}': {e}"))
        })?;
        Ok(Some(session))
    }

    fn flush(&self, path: &Path, session: &Session) -> Result<(), IoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IoError::SessionStorage(format!("failed to create session directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(session).map_err(|e| {
            IoError::SessionStorage(format!("failed to serialize session '{}': {e}", session.key))
        })?;
        std::fs::write(path, content).map_err(|e| {
            IoError::SessionStorage(format!("failed to write session '{}': {e}", session.key))
        })?;
        Ok(())
    }
}

/// Turn an opaque key into a safe file stem. Keys that only contain safe
/// characters keep their name; anything else gets sanitized with a stable
/// hash suffix so two sanitized keys cannot collide.
fn file_stem(key: &str) -> String {
    let safe = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if safe && !key.is_empty() {
        return key.to_string();
    }

    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    format!("{sanitized}-{:016x}", hasher.finish())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn resolve_or_create(&self, key: &SessionKey) -> Result<SessionHandle, IoError> {
        if let Some(handle) = self.sessions.read().await.get(key.as_str()) {
            return Ok(Arc::clone(handle));
        }

        let mut sessions = self.sessions.write().await;
        // Re-check under the write lock — a racing creator may have won.
        if let Some(handle) = sessions.get(key.as_str()) {
            return Ok(Arc::clone(handle));
        }

        let path = self.document_path(key);
        let session = match Self::load_document(&path, key)? {
            Some(session) => {
                debug!(session_key = %key, turns = session.turns.len(), "Loaded session from disk");
                session
            }
            None => {
                debug!(session_key = %key, "Creating session");
                Session::new(key.clone())
            }
        };

        let handle: SessionHandle = Arc::new(RwLock::new(session));
        sessions.insert(key.as_str().to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<SessionHandle>, IoError> {
        if let Some(handle) = self.sessions.read().await.get(key.as_str()) {
            return Ok(Some(Arc::clone(handle)));
        }

        let path = self.document_path(key);
        let Some(session) = Self::load_document(&path, key)? else {
            return Ok(None);
        };

        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(key.as_str().to_string())
            .or_insert_with(|| Arc::new(RwLock::new(session)));
        Ok(Some(Arc::clone(handle)))
    }

    async fn persist(&self, key: &SessionKey) -> Result<(), IoError> {
        let Some(handle) = self.sessions.read().await.get(key.as_str()).map(Arc::clone) else {
            return Err(IoError::SessionStorage(format!(
                "cannot persist unknown session '{key}'"
            )));
        };

        let session = handle.read().await;
        self.flush(&self.document_path(key), &session)
    }

    async fn count(&self) -> Result<usize, IoError> {
        Ok(self.sessions.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::session::TurnRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn persists_and_reloads_sessions() {
        let tmp = TempDir::new().unwrap();
        let key = SessionKey::from("s1");

        {
            let store = FileSessionStore::new(tmp.path());
            let handle = store.resolve_or_create(&key).await.unwrap();
            handle
                .write()
                .await
                .record_turn(TurnRecord::new("list projects", "Project A"));
            store.persist(&key).await.unwrap();
        }

        // A fresh store over the same directory finds the session.
        let store = FileSessionStore::new(tmp.path());
        let handle = store.get(&key).await.unwrap().expect("session on disk");
        let session = handle.read().await;
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].response, "Project A");
    }

    #[tokio::test]
    async fn unknown_key_creates_empty_session() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path());

        let handle = store.resolve_or_create(&SessionKey::from("fresh")).await.unwrap();
        let session = handle.read().await;
        assert!(session.turns.is_empty());
        assert_eq!(session.state, serde_json::json!({}));
    }

    #[tokio::test]
    async fn resolve_is_idempotent_without_flush() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path());
        let key = SessionKey::from("s1");

        let first = store.resolve_or_create(&key).await.unwrap();
        let second = store.resolve_or_create(&key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad.json"), "this is not json").unwrap();

        let store = FileSessionStore::new(tmp.path());
        let err = store.resolve_or_create(&SessionKey::from("bad")).await.unwrap_err();
        assert!(matches!(err, IoError::SessionStorage(_)));
        assert!(err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn persist_unknown_session_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path());
        let err = store.persist(&SessionKey::from("ghost")).await.unwrap_err();
        assert!(matches!(err, IoError::SessionStorage(_)));
    }

    #[test]
    fn file_stem_keeps_safe_keys() {
        assert_eq!(file_stem("s1"), "s1");
        assert_eq!(file_stem("user_42.main"), "user_42.main");
    }

    #[test]
    fn file_stem_disambiguates_unsafe_keys() {
        let a = file_stem("a/b");
        let b = file_stem("a:b");
        assert_ne!(a, b);
        assert!(a.starts_with("a-b-"));
    }
}
