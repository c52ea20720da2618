//! Persisted integration state.
//!
//! The host keeps one JSON blob per key between invocations. Cursors and
//! authentication state are both stored here, under separate keys.

use crate::cursor::{Cursor, StreamCursor};
use crate::error::{StoreError, StoreResult};
use crate::record::StreamId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

/// Key-value storage for JSON state blobs.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Replaces the blob stored under `key`.
    async fn put(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Loads and deserializes the blob under `key`.
pub async fn load_state<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Serializes `state` and stores it under `key`.
pub async fn save_state<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    key: &str,
    state: &T,
) -> StoreResult<()> {
    let value = serde_json::to_value(state)
        .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e)))?;
    store.put(key, value).await
}

/// In-memory state store, used in tests and previews.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

/// State store backed by a single JSON object on disk.
///
/// Writes go to a sibling temp file that is then renamed over the original,
/// so a crash never leaves a half-written state file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StoreResult<Map<String, Value>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", self.path.display(), e))),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::Serialization(format!(
                "{}: state file is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(StoreError::Serialization(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> StoreResult<()> {
        let body = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(format!("{}: {}", parent.display(), e)))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), "State file written");
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), value);
        self.write_all(map).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        if map.remove(key).is_some() {
            self.write_all(map).await?;
        }
        Ok(())
    }
}

/// Cursor persistence for one integration instance.
#[derive(Clone)]
pub struct CursorStore {
    store: Arc<dyn StateStore>,
    key: String,
}

impl CursorStore {
    /// Stores cursors under `cursor:<namespace>`.
    pub fn new(store: Arc<dyn StateStore>, namespace: &str) -> Self {
        Self {
            store,
            key: format!("cursor:{}", namespace),
        }
    }

    /// The storage key of this cursor.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the full cursor. A never-written cursor is empty.
    pub async fn load(&self) -> StoreResult<Cursor> {
        Ok(load_state(self.store.as_ref(), &self.key)
            .await?
            .unwrap_or_default())
    }

    /// Writes back a single stream's position, leaving other streams untouched.
    #[instrument(skip(self, cursor), fields(key = %self.key))]
    pub async fn save_stream(&self, stream: &StreamId, cursor: StreamCursor) -> StoreResult<()> {
        let mut all = self.load().await?;
        all.set(stream.clone(), cursor);
        save_state(self.store.as_ref(), &self.key, &all).await
    }

    /// The underlying state store.
    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }
}
