//! Best-effort JSON persistence shared by every durable store.
//!
//! Files are written to a `*.json.tmp` sibling first and then renamed over the
//! target. On load a corrupted target falls back to the temp sibling, then to
//! `Default`. No operation here ever returns an error to the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Reads `path` as JSON, falling back to its `.json.tmp` sibling on corruption.
pub async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
                match tokio::fs::read(tmp_path(path)).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => T::default(),
                }
            }
        },
        Err(_) => T::default(),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Handle on one JSON file. Writers are serialised so temp files never interleave.
#[derive(Debug)]
pub struct JsonFile<T> {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// A file that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn load(&self) -> T {
        match &self.path {
            Some(path) => read_json_with_tmp_fallback(path).await,
            None => T::default(),
        }
    }

    /// Persists the value produced by `snapshot`. The snapshot is taken under
    /// this file's write lock, so the last write to land holds the newest state.
    pub async fn save_with<F, Fut>(&self, snapshot: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(path) = &self.path else {
            debug!("store is in-memory only; skipping persist");
            return;
        };
        let _guard = self.write_lock.lock().await;
        let value = snapshot().await;
        let bytes = match serde_json::to_vec_pretty(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to serialize store");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let tmp = tmp_path(path);
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            warn!(error = %e, path = %tmp.display(), "failed to write temp store file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            warn!(error = %e, path = %path.display(), "failed to persist store file");
        }
    }
}

/// String-keyed JSON document, the equivalent of a small preferences database.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    values: Arc<RwLock<BTreeMap<String, Value>>>,
    file: Arc<JsonFile<BTreeMap<String, Value>>>,
}

impl KeyValueStore {
    pub fn in_memory() -> Self {
        Self {
            values: Arc::new(RwLock::new(BTreeMap::new())),
            file: Arc::new(JsonFile::in_memory()),
        }
    }

    pub async fn load_from(path: impl Into<PathBuf>) -> Self {
        let file = JsonFile::new(path);
        let values = file.load().await;
        Self {
            values: Arc::new(RwLock::new(values)),
            file: Arc::new(file),
        }
    }

    /// Missing keys and values of the wrong shape both read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let values = self.values.read().await;
        let value = values.get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, key, "stored value has unexpected shape");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, key, "failed to serialize value");
                return;
            }
        };
        self.values.write().await.insert(key.to_string(), value);
        self.persist().await;
    }

    pub async fn remove(&self, key: &str) {
        if self.values.write().await.remove(key).is_none() {
            return;
        }
        self.persist().await;
    }

    async fn persist(&self) {
        self.file
            .save_with(|| async { self.values.read().await.clone() })
            .await;
    }
}
