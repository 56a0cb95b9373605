//! External payload stores.
//!
//! Two shapes are used: a key-value store holding small JSON text records and
//! a binary-object store for very large payloads. Both are addressed by the
//! opaque keys the transport selector generates.

use crate::{Result, TtsError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Text key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, key: &str, value: String) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Keys are plain `[A-Za-z0-9_-]` names so they can double as file names
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Sidecar metadata written next to a binary object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub timestamp: i64,
    pub size: usize,
    pub content_type: String,
}

/// Binary-object store
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> Result<bool>;
}

/// In-memory key-value store with an optional byte quota.
///
/// Quota accounting counts key plus value bytes.
pub struct InMemoryKvStore {
    entries: DashMap<String, String>,
    quota_bytes: Option<usize>,
}

impl InMemoryKvStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            quota_bytes: None,
        })
    }

    pub fn with_quota(quota_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            quota_bytes: Some(quota_bytes),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.key() != key)
            .map(|e| e.key().len() + e.value().len())
            .sum()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn put(&self, key: &str, value: String) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let needed = self.used_bytes_excluding(key) + key.len() + value.len();
            if needed > quota {
                return Err(TtsError::StorageQuota(format!(
                    "{} bytes needed, quota is {} bytes",
                    needed, quota
                )));
            }
        }
        self.entries.insert(key.to_string(), value);
        debug!(target: "transport", key = %key, "Stored key-value record");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// In-memory binary-object store
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: DashMap<String, (Vec<u8>, BlobMetadata)>,
}

impl InMemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn metadata(&self, key: &str) -> Option<BlobMetadata> {
        self.objects.get(key).map(|o| o.value().1.clone())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()> {
        self.objects
            .insert(key.to_string(), (bytes.to_vec(), metadata.clone()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|o| o.value().0.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.remove(key).is_some())
    }
}

/// Binary objects as files: `<key>.bin` plus a `<key>.json` metadata sidecar
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Arc<Self>> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        info!(target: "transport", root = %root.display(), "Filesystem blob store initialized");
        Ok(Arc::new(Self { root }))
    }

    fn paths(&self, key: &str) -> Result<(PathBuf, PathBuf)> {
        if !is_valid_key(key) {
            return Err(TtsError::Storage(format!("Invalid storage key: {:?}", key)));
        }
        Ok((
            self.root.join(format!("{}.bin", key)),
            self.root.join(format!("{}.json", key)),
        ))
    }

    pub async fn metadata(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let (_, meta_path) = self.paths(key)?;
        match tokio::fs::read(&meta_path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()> {
        let (data_path, meta_path) = self.paths(key)?;
        let partial = data_path.with_extension("bin.part");
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| TtsError::Storage(format!("Failed to write {}: {}", partial.display(), e)))?;
        tokio::fs::rename(&partial, &data_path).await?;
        tokio::fs::write(&meta_path, serde_json::to_vec(metadata)?).await?;
        debug!(target: "transport", key = %key, size = bytes.len(), "Stored binary object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let (data_path, _) = self.paths(key)?;
        match tokio::fs::read(&data_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let (data_path, meta_path) = self.paths(key)?;
        let existed = match tokio::fs::remove_file(&data_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        let _ = tokio::fs::remove_file(&meta_path).await;
        Ok(existed)
    }
}

/// Persistent key-value store on RocksDB
#[cfg(feature = "rocksdb")]
pub struct RocksKvStore {
    db: rocksdb::DB,
}

#[cfg(feature = "rocksdb")]
impl RocksKvStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);

        let db = rocksdb::DB::open(&opts, path).map_err(|e| TtsError::Storage(e.to_string()))?;

        info!(target: "transport", "RocksDB key-value store initialized");
        Ok(Arc::new(Self { db }))
    }
}

#[cfg(feature = "rocksdb")]
#[async_trait]
impl KeyValueStore for RocksKvStore {
    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.db
            .put(key.as_bytes(), value.as_bytes())
            .map_err(|e| TtsError::Storage(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(data)) => String::from_utf8(data)
                .map(Some)
                .map_err(|e| TtsError::Storage(format!("Corrupt record {}: {}", key, e))),
            Ok(None) => Ok(None),
            Err(e) => Err(TtsError::Storage(e.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self
            .db
            .get(key.as_bytes())
            .map_err(|e| TtsError::Storage(e.to_string()))?
            .is_some();
        self.db
            .delete(key.as_bytes())
            .map_err(|e| TtsError::Storage(e.to_string()))?;
        Ok(existed)
    }
}
