//! Size-based delivery of synthesized audio.
//!
//! Small payloads travel inline in the host response. Larger ones are written
//! to an external store and returned by key: the binary-object store for very
//! large payloads when one is configured, the key-value store otherwise.
//! Oversized payloads are rejected outright; nothing is ever truncated.

pub mod store;

pub use store::{BlobMetadata, BlobStore, FsBlobStore, InMemoryBlobStore, InMemoryKvStore, KeyValueStore};

#[cfg(feature = "rocksdb")]
pub use store::RocksKvStore;

use store::is_valid_key;

use crate::config::TransportConfig;
use crate::{Result, TtsError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const AUDIO_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    Inline,
    External,
    ObjectStore,
}

impl TransportMode {
    /// Value of the response `method` field
    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Inline => "inline",
            TransportMode::External => "external",
            TransportMode::ObjectStore => "object-store",
        }
    }
}

/// How the audio reaches the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEnvelope {
    pub mode: TransportMode,
    /// Set for `Inline` only
    pub payload: Option<Vec<u8>>,
    /// Set for `External` and `ObjectStore`
    pub storage_key: Option<String>,
    pub size: usize,
}

/// Key-value record for an externally stored payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAudioRecord {
    pub audio_base64: String,
    pub timestamp: i64,
    pub size: usize,
    pub content_type: String,
}

/// Length of `bytes` serialized as a JSON number array
pub fn json_array_len(bytes: &[u8]) -> usize {
    let digits: usize = bytes
        .iter()
        .map(|b| match b {
            0..=9 => 1,
            10..=99 => 2,
            _ => 3,
        })
        .sum();
    2 + digits + bytes.len().saturating_sub(1)
}

/// `tts_audio_<unix millis>_<uuid>`
pub fn generate_storage_key() -> String {
    format!(
        "tts_audio_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

#[derive(Clone)]
pub struct TransportSelector {
    config: TransportConfig,
    kv: Arc<dyn KeyValueStore>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl TransportSelector {
    pub fn new(
        config: TransportConfig,
        kv: Arc<dyn KeyValueStore>,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        Self { config, kv, blobs }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Absolute payload ceiling for a request
    pub fn max_payload(&self, unlimited_storage_allowed: bool) -> usize {
        if unlimited_storage_allowed {
            self.config.max_payload_unlimited_bytes
        } else {
            self.config.max_payload_bytes
        }
    }

    pub async fn deliver(
        &self,
        bytes: Vec<u8>,
        unlimited_storage_allowed: bool,
    ) -> Result<TransportEnvelope> {
        let size = bytes.len();
        let limit = self.max_payload(unlimited_storage_allowed);
        if size > limit {
            warn!(target: "transport", size, limit, "Audio payload exceeds absolute limit");
            return Err(TtsError::PayloadTooLarge { size, limit });
        }

        if size < self.config.inline_threshold_bytes {
            let encoded = json_array_len(&bytes);
            if encoded < self.config.message_ceiling_bytes {
                debug!(target: "transport", size, encoded, "Delivering audio inline");
                return Ok(TransportEnvelope {
                    mode: TransportMode::Inline,
                    payload: Some(bytes),
                    storage_key: None,
                    size,
                });
            }
            warn!(
                target: "transport",
                size,
                encoded,
                ceiling = self.config.message_ceiling_bytes,
                "Encoded payload exceeds message ceiling; storing externally"
            );
        }

        let key = generate_storage_key();
        let timestamp = Utc::now().timestamp_millis();

        if size >= self.config.object_store_threshold_bytes {
            if let Some(blobs) = &self.blobs {
                let metadata = BlobMetadata {
                    timestamp,
                    size,
                    content_type: AUDIO_CONTENT_TYPE.to_string(),
                };
                match blobs.put(&key, &bytes, &metadata).await {
                    Ok(()) => {
                        info!(target: "transport", key = %key, size, "Audio stored in object store");
                        return Ok(TransportEnvelope {
                            mode: TransportMode::ObjectStore,
                            payload: None,
                            storage_key: Some(key),
                            size,
                        });
                    }
                    Err(e) => {
                        warn!(target: "transport", key = %key, error = %e, "Object store write failed; falling back to key-value store");
                    }
                }
            }
        }

        let record = StoredAudioRecord {
            audio_base64: BASE64.encode(&bytes),
            timestamp,
            size,
            content_type: AUDIO_CONTENT_TYPE.to_string(),
        };
        let value = serde_json::to_string(&record)?;
        if let Err(e) = self.kv.put(&key, value).await {
            warn!(target: "transport", key = %key, size, error = %e, "Key-value store write failed");
            return Err(match e {
                TtsError::StorageQuota(msg) => TtsError::StorageQuota(msg),
                other => TtsError::StorageQuota(format!(
                    "Could not store {} bytes of audio: {}",
                    size, other
                )),
            });
        }

        info!(target: "transport", key = %key, size, "Audio stored in key-value store");
        Ok(TransportEnvelope {
            mode: TransportMode::External,
            payload: None,
            storage_key: Some(key),
            size,
        })
    }

    /// Read back an externally stored payload from whichever store holds it
    pub async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !is_valid_key(key) {
            debug!(target: "transport", key = %key, "Malformed storage key; nothing stored under it");
            return Ok(None);
        }
        if let Some(blobs) = &self.blobs {
            if let Some(bytes) = blobs.get(key).await? {
                return Ok(Some(bytes));
            }
        }
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        let record: StoredAudioRecord = serde_json::from_str(&raw)?;
        let bytes = BASE64
            .decode(record.audio_base64.as_bytes())
            .map_err(|e| TtsError::Storage(format!("Corrupt audio record {}: {}", key, e)))?;
        Ok(Some(bytes))
    }

    /// Delete an externally stored payload; returns whether anything was removed
    pub async fn release(&self, key: &str) -> Result<bool> {
        if !is_valid_key(key) {
            return Ok(false);
        }
        let mut removed = false;
        if let Some(blobs) = &self.blobs {
            removed |= blobs.delete(key).await?;
        }
        removed |= self.kv.delete(key).await?;
        debug!(target: "transport", key = %key, removed, "Released stored audio");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_array_len_matches_serde() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(
            json_array_len(&bytes),
            serde_json::to_string(&bytes).unwrap().len()
        );
        assert_eq!(json_array_len(&[]), 2);
    }

    #[test]
    fn test_storage_key_shape() {
        let key = generate_storage_key();
        assert!(key.starts_with("tts_audio_"));
        assert_ne!(key, generate_storage_key());
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_mode_strings() {
        assert_eq!(TransportMode::ObjectStore.as_str(), "object-store");
        assert_eq!(
            serde_json::to_string(&TransportMode::ObjectStore).unwrap(),
            "\"object-store\""
        );
    }
}
