//! Voice model cache manager.
//!
//! The engine's model store is eventually consistent: a completed download may
//! not show up in `list-stored` right away, so every read-after-write here
//! polls with a fixed delay and a bounded attempt count.

use crate::config::CacheConfig;
use crate::engine::VoiceDescriptor;
use crate::voice::VoiceCatalog;
use crate::worker::{RemoveOutcome, WorkerCoordinator};
use crate::{Result, StorageDiagnostics, TtsError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

const NO_PROGRESS: u8 = u8::MAX;

/// How `ensure_available` satisfied the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    AlreadyStored,
    Downloaded,
}

/// Tracks and repairs locally materialized voice models
#[derive(Clone)]
pub struct ModelCacheManager {
    worker: WorkerCoordinator,
    config: CacheConfig,
}

impl ModelCacheManager {
    pub fn new(worker: WorkerCoordinator, config: CacheConfig) -> Self {
        Self { worker, config }
    }

    pub fn worker(&self) -> &WorkerCoordinator {
        &self.worker
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Snapshot of the ids currently stored, sorted
    pub async fn stored_set(&self) -> Result<Vec<String>> {
        let mut stored = self.worker.stored().await?;
        stored.sort();
        stored.dedup();
        Ok(stored)
    }

    /// Make sure `voice_id` is stored, downloading it when absent.
    ///
    /// `on_progress` receives whole percentages in steps of ten.
    pub async fn ensure_available(
        &self,
        voice_id: &str,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Availability> {
        let before = self.stored_set().await?;
        if before.iter().any(|id| id == voice_id) {
            debug!(target: "model_cache", voice = %voice_id, "Model already stored");
            return Ok(Availability::AlreadyStored);
        }

        info!(target: "model_cache", voice = %voice_id, "Model not stored; downloading");
        self.download_verified(voice_id, before, on_progress).await?;
        Ok(Availability::Downloaded)
    }

    /// Run a minimal synthesis against the model; `Ok(false)` means corrupted
    pub async fn verify_integrity(&self, voice_id: &str) -> Result<bool> {
        match self
            .worker
            .predict(&self.config.smoke_test_text, voice_id)
            .await
        {
            Ok(bytes) if bytes.is_empty() => {
                warn!(target: "model_cache", voice = %voice_id, "Smoke test produced no audio");
                Ok(false)
            }
            Ok(_) => {
                debug!(target: "model_cache", voice = %voice_id, "Smoke test passed");
                Ok(true)
            }
            Err(TtsError::ModelCorruption { message, .. }) => {
                warn!(
                    target: "model_cache",
                    voice = %voice_id,
                    error = %message,
                    "Smoke test hit a corruption signature"
                );
                Ok(false)
            }
            Err(TtsError::Phonemization { message, .. }) => {
                warn!(
                    target: "model_cache",
                    voice = %voice_id,
                    error = %message,
                    "Smoke test text could not be phonemized"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a model, wait for the store to settle, then download it again
    pub async fn evict_and_redownload(
        &self,
        voice_id: &str,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()> {
        info!(target: "model_cache", voice = %voice_id, "Evicting model for re-download");
        match self.worker.remove(voice_id).await {
            Ok(RemoveOutcome::Removed) => {}
            Ok(RemoveOutcome::Unsupported) => {
                info!(
                    target: "model_cache",
                    voice = %voice_id,
                    "Engine cannot remove models; re-downloading over the existing copy"
                );
            }
            Err(e) => {
                warn!(target: "model_cache", voice = %voice_id, error = %e, "Model removal failed; re-downloading anyway");
            }
        }
        sleep(Duration::from_millis(self.config.remove_settle_ms)).await;

        let before = self.stored_set().await?;
        self.download_verified(voice_id, before, on_progress).await?;

        if let Err(e) = self.worker.clear_session_cache().await {
            warn!(target: "model_cache", voice = %voice_id, error = %e, "Session cache clear after re-download failed");
        }
        Ok(())
    }

    /// Evict a model on request; `Unsupported` when the engine cannot
    pub async fn remove(&self, voice_id: &str) -> Result<RemoveOutcome> {
        let outcome = self.worker.remove(voice_id).await?;
        if outcome == RemoveOutcome::Removed {
            info!(target: "model_cache", voice = %voice_id, "Model removed");
        }
        Ok(outcome)
    }

    async fn download_verified(
        &self,
        voice_id: &str,
        stored_before: Vec<String>,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<()> {
        let last_bucket = AtomicU8::new(NO_PROGRESS);
        let report = |fraction: f32| {
            let bucket = ((fraction.clamp(0.0, 1.0) * 10.0).floor() as u8) * 10;
            let previous = last_bucket.load(Ordering::SeqCst);
            if previous == NO_PROGRESS || bucket > previous {
                last_bucket.store(bucket, Ordering::SeqCst);
                on_progress(bucket);
            }
        };
        self.worker.download(voice_id, &report).await?;

        let (found, stored_after, attempts) = self.poll_stored(voice_id).await;
        if found {
            info!(target: "model_cache", voice = %voice_id, attempts, "Model download verified");
            if last_bucket.load(Ordering::SeqCst) != 100 {
                on_progress(100);
            }
            return Ok(());
        }

        let last = last_bucket.load(Ordering::SeqCst);
        let diagnostics = StorageDiagnostics {
            requested: voice_id.to_string(),
            stored_before,
            stored_after,
            last_progress: (last != NO_PROGRESS).then_some(last),
            attempts,
        };
        warn!(
            target: "model_cache",
            voice = %voice_id,
            attempts,
            stored_after = ?diagnostics.stored_after,
            "Downloaded model never appeared in storage"
        );
        Err(TtsError::ModelStorage(Box::new(diagnostics)))
    }

    /// Poll `list-stored` until `voice_id` shows up or attempts run out
    async fn poll_stored(&self, voice_id: &str) -> (bool, Vec<String>, u32) {
        let attempts = self.config.verify_attempts.max(1);
        let delay = Duration::from_millis(self.config.verify_delay_ms);
        let mut snapshot = Vec::new();

        for attempt in 1..=attempts {
            match self.stored_set().await {
                Ok(stored) => {
                    if stored.iter().any(|id| id == voice_id) {
                        return (true, stored, attempt);
                    }
                    snapshot = stored;
                }
                Err(e) => {
                    warn!(target: "model_cache", voice = %voice_id, attempt, error = %e, "Stored listing failed during verification");
                }
            }
            if attempt < attempts {
                debug!(target: "model_cache", voice = %voice_id, attempt, "Model not visible yet; retrying");
                sleep(delay).await;
            }
        }
        (false, snapshot, attempts)
    }
}

#[async_trait]
impl VoiceCatalog for ModelCacheManager {
    async fn catalog(&self) -> Result<Vec<VoiceDescriptor>> {
        self.worker.voices().await
    }
}
