//! Durable storage for the last-known session id.
//!
//! The store holds a single record. It is read once at startup to restore the
//! previous session, written when a session is created, and cleared when the
//! session is invalidated or rolled back.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, TramaGridError};

/// The persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Last persisted session id, if any.
    async fn load(&self) -> Result<Option<String>>;

    async fn save(&self, session_id: &str) -> Result<()>;

    /// Remove the persisted id. Clearing an empty store is not an error.
    async fn clear(&self) -> Result<()>;
}

/// File-backed store: one small JSON document.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        if data.trim().is_empty() {
            return Ok(None);
        }
        let record: StoredSession = serde_json::from_str(&data)
            .map_err(|e| TramaGridError::Decode(format!("corrupt session file: {e}")))?;
        if record.session_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(record.session_id))
    }

    async fn save(&self, session_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let record = StoredSession {
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
        };
        let data = serde_json::to_string_pretty(&record)?;
        // Atomic write: write to temp then rename
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Persisted session id");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if self.path.exists() {
            tokio::fs::remove_file(&self.path).await?;
            debug!(path = %self.path.display(), "Cleared persisted session id");
        }
        Ok(())
    }
}

/// In-process store for tests and throwaway clients.
#[derive(Default)]
pub struct MemorySessionStore {
    value: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(session_id.into())),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.value.lock().await.clone())
    }

    async fn save(&self, session_id: &str) -> Result<()> {
        *self.value.lock().await = Some(session_id.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.value.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));

        assert_eq!(store.load().await.unwrap(), None);
        store.save("abc-123").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("abc-123"));

        // A second store on the same path sees the same id (process restart)
        let reopened = FileSessionStore::new(dir.path().join("session.json"));
        assert_eq!(reopened.load().await.unwrap().as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_file_store_overwrite_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested").join("session.json"));

        store.save("first").await.unwrap();
        store.save("second").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("second"));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileSessionStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(TramaGridError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::with_session("s1");
        assert_eq!(store.load().await.unwrap().as_deref(), Some("s1"));
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        store.save("s2").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("s2"));
    }
}
