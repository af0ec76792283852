//! Local session cache — the single client-side slot holding the current
//! session document.
//!
//! Every write replaces the whole document. The file backend writes to a
//! sibling temp file and renames it over the target so readers never see a
//! half-written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheError;
use crate::wizard::model::Session;

/// Raw storage for the cached document.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Read the raw document, `None` when the slot is empty.
    async fn read(&self) -> Result<Option<String>, CacheError>;

    /// Replace the slot's contents.
    async fn write(&self, document: &str) -> Result<(), CacheError>;

    /// Empty the slot.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// JSON file on disk.
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "session.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LocalCache for FileCache {
    async fn read(&self) -> Result<Option<String>, CacheError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, document: &str) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = document.len(), "Session cache written");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory slot, for tests and embedded hosts.
#[derive(Default)]
pub struct MemoryCache {
    slot: RwLock<Option<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the slot with raw contents (possibly malformed).
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            slot: RwLock::new(Some(document.into())),
        }
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn read(&self) -> Result<Option<String>, CacheError> {
        Ok(self.slot.read().await.clone())
    }

    async fn write(&self, document: &str) -> Result<(), CacheError> {
        *self.slot.write().await = Some(document.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        *self.slot.write().await = None;
        Ok(())
    }
}

/// What was found in the cache slot.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedSession {
    Empty,
    Valid(Session),
    /// Present but unusable; carries the parse or invariant failure.
    Malformed(String),
}

/// Typed view over a [`LocalCache`]: the one serialization boundary for the
/// local session document.
pub struct SessionStore {
    cache: std::sync::Arc<dyn LocalCache>,
}

impl SessionStore {
    pub fn new(cache: std::sync::Arc<dyn LocalCache>) -> Self {
        Self { cache }
    }

    pub async fn load(&self) -> Result<CachedSession, CacheError> {
        let Some(raw) = self.cache.read().await? else {
            return Ok(CachedSession::Empty);
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => match session.check_invariants() {
                Ok(()) => Ok(CachedSession::Valid(session)),
                Err(reason) => Ok(CachedSession::Malformed(reason)),
            },
            Err(e) => Ok(CachedSession::Malformed(e.to_string())),
        }
    }

    pub async fn save(&self, session: &Session) -> Result<(), CacheError> {
        let doc = serde_json::to_string(session)?;
        self.cache.write(&doc).await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.cache.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn file_cache_roundtrip_and_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = FileCache::new(tmp.path().join("nested").join("session.json"));

        assert!(cache.read().await.unwrap().is_none());
        cache.write("{\"a\":1}").await.unwrap();
        assert_eq!(cache.read().await.unwrap().as_deref(), Some("{\"a\":1}"));

        cache.write("{\"b\":2}").await.unwrap();
        assert_eq!(cache.read().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert!(!cache.temp_path().exists());

        cache.clear().await.unwrap();
        assert!(cache.read().await.unwrap().is_none());
        // Clearing an empty slot is fine
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn store_detects_malformed_documents() {
        let store = SessionStore::new(Arc::new(MemoryCache::with_document("{not json")));
        assert!(matches!(store.load().await.unwrap(), CachedSession::Malformed(_)));

        let store = SessionStore::new(Arc::new(MemoryCache::new()));
        assert_eq!(store.load().await.unwrap(), CachedSession::Empty);
    }

    #[tokio::test]
    async fn store_rejects_inconsistent_completion() {
        let mut s = Session::new(Uuid::new_v4());
        s.is_complete = true;
        let doc = serde_json::to_string(&s).unwrap();
        let store = SessionStore::new(Arc::new(MemoryCache::with_document(doc)));
        assert!(matches!(store.load().await.unwrap(), CachedSession::Malformed(_)));
    }

    #[tokio::test]
    async fn store_save_then_load() {
        let store = SessionStore::new(Arc::new(MemoryCache::new()));
        let s = Session::new(Uuid::new_v4());
        store.save(&s).await.unwrap();
        assert_eq!(store.load().await.unwrap(), CachedSession::Valid(s));
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), CachedSession::Empty);
    }
}
