use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::types::Message;

/// Where session histories live. Picked once at startup; callers never
/// branch on the variant.
#[derive(Clone)]
pub enum SessionStore {
    File(FileSessionStore),
    Memory(MemorySessionStore),
}

impl SessionStore {
    pub async fn append_message(&self, session_id: &str, msg: &Message) -> Result<()> {
        match self {
            SessionStore::File(store) => store.append_message(session_id, msg).await,
            SessionStore::Memory(store) => store.append_message(session_id, msg).await,
        }
    }

    pub async fn fetch_prev_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        match self {
            SessionStore::File(store) => store.fetch_prev_messages(session_id).await,
            SessionStore::Memory(store) => Ok(store.fetch_prev_messages(session_id).await),
        }
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        match self {
            SessionStore::File(store) => store.exists(session_id).await,
            SessionStore::Memory(store) => store.exists(session_id).await,
        }
    }
}

/// One pretty-printed JSON array per session under `base_dir`.
#[derive(Clone)]
pub struct FileSessionStore {
    base_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        if session_id.is_empty()
            || session_id.contains(|c: char| c == '/' || c == '\\')
            || session_id.starts_with('.')
        {
            anyhow::bail!("Invalid session id: {:?}", session_id);
        }
        Ok(self.base_dir.join(format!("{}.json", session_id)))
    }

    async fn read_messages(path: &Path) -> Result<Vec<Message>> {
        match tokio::fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("Corrupt session file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub async fn append_message(&self, session_id: &str, msg: &Message) -> Result<()> {
        let path = self.session_path(session_id)?;
        let _guard = self.write_lock.lock().await;

        let mut messages = Self::read_messages(&path).await?;
        messages.push(msg.clone());

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;
        let data = serde_json::to_vec_pretty(&messages)?;
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(session_id, count = messages.len(), "Session file updated");
        Ok(())
    }

    pub async fn fetch_prev_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.session_path(session_id)?;
        Self::read_messages(&path).await
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        match self.session_path(session_id) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Process-local key/value store; histories vanish with the process.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append_message(&self, session_id: &str, msg: &Message) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(msg.clone());
        Ok(())
    }

    pub async fn fetch_prev_messages(&self, session_id: &str) -> Vec<Message> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::MessageRole;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_append_and_fetch() {
        let store = SessionStore::Memory(MemorySessionStore::new());
        assert!(!store.exists("s1").await);
        assert!(store.fetch_prev_messages("s1").await.unwrap().is_empty());

        store.append_message("s1", &Message::system("p")).await.unwrap();
        store.append_message("s1", &Message::user("hi")).await.unwrap();

        assert!(store.exists("s1").await);
        let messages = store.fetch_prev_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::User);
        assert!(!store.exists("s2").await);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::File(FileSessionStore::new(dir.path().join("session")));

        assert!(!store.exists("abc").await);
        assert!(store.fetch_prev_messages("abc").await.unwrap().is_empty());

        store.append_message("abc", &Message::user("hi")).await.unwrap();
        store
            .append_message("abc", &Message::tool_result("c1", "42"))
            .await
            .unwrap();

        assert!(store.exists("abc").await);
        let messages = store.fetch_prev_messages("abc").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c1"));

        let raw = std::fs::read_to_string(dir.path().join("session/abc.json")).unwrap();
        assert!(raw.starts_with('['));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path());

        assert!(store.append_message("../escape", &Message::user("x")).await.is_err());
        assert!(store.append_message("", &Message::user("x")).await.is_err());
        assert!(!store.exists("a/b").await);
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "not json").unwrap();
        let store = FileSessionStore::new(dir.path());

        assert!(store.exists("bad").await);
        assert!(store.fetch_prev_messages("bad").await.is_err());
    }
}
