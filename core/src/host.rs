//! Host message handling.
//!
//! Inbound messages are JSON objects tagged by `action`; every response carries
//! `success`, and failures add a human-readable `error` plus a stable `code`.

use crate::cache::Availability;
use crate::engine::VoiceDescriptor;
use crate::orchestrator::{
    CancellationFlag, SynthesisEvent, SynthesisOrchestrator, SynthesisRequest,
};
use crate::voice::{is_canonical_voice_id, selectable_voices, VoiceRef};
use crate::worker::{Lifecycle, RemoveOutcome};
use crate::{Result, TtsError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisOptions {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub voice: Option<VoiceRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum HostRequest {
    #[serde(rename_all = "camelCase")]
    Synthesize {
        text: String,
        #[serde(default)]
        options: SynthesisOptions,
        #[serde(default)]
        unlimited_storage_allowed: bool,
    },
    ListVoices,
    ListStoredVoices,
    HealthCheck,
    #[serde(rename_all = "camelCase")]
    DownloadVoice { voice_id: String },
    #[serde(rename_all = "camelCase")]
    RemoveVoice { voice_id: String },
    #[serde(rename_all = "camelCase")]
    FetchAudio { storage_key: String },
    #[serde(rename_all = "camelCase")]
    ReleaseAudio { storage_key: String },
}

impl HostRequest {
    pub fn action(&self) -> &'static str {
        match self {
            HostRequest::Synthesize { .. } => "synthesize",
            HostRequest::ListVoices => "listVoices",
            HostRequest::ListStoredVoices => "listStoredVoices",
            HostRequest::HealthCheck => "healthCheck",
            HostRequest::DownloadVoice { .. } => "downloadVoice",
            HostRequest::RemoveVoice { .. } => "removeVoice",
            HostRequest::FetchAudio { .. } => "fetchAudio",
            HostRequest::ReleaseAudio { .. } => "releaseAudio",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HostResponse {
    #[serde(rename_all = "camelCase")]
    Synthesized {
        success: bool,
        method: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_data: Option<Vec<u8>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        storage_key: Option<String>,
        size: usize,
        voice_id: String,
        language: String,
        chunks: usize,
        sample_rate: u32,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Voices {
        success: bool,
        voices: Vec<VoiceDescriptor>,
    },
    StoredVoices {
        success: bool,
        voices: Vec<String>,
    },
    Health {
        success: bool,
        ready: bool,
        worker: String,
    },
    #[serde(rename_all = "camelCase")]
    Downloaded {
        success: bool,
        voice_id: String,
        downloaded: bool,
    },
    #[serde(rename_all = "camelCase")]
    Removed {
        success: bool,
        voice_id: String,
        removed: bool,
    },
    #[serde(rename_all = "camelCase")]
    Audio {
        success: bool,
        storage_key: String,
        audio_data: Vec<u8>,
        size: usize,
    },
    #[serde(rename_all = "camelCase")]
    Released {
        success: bool,
        storage_key: String,
        released: bool,
    },
    Failure {
        success: bool,
        error: String,
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl HostResponse {
    pub fn failure(error: &TtsError) -> Self {
        let details = match error {
            TtsError::ModelStorage(diagnostics) => serde_json::to_value(diagnostics.as_ref()).ok(),
            _ => None,
        };
        HostResponse::Failure {
            success: false,
            error: error.to_string(),
            code: error.code().to_string(),
            details,
        }
    }

    fn rejected(error: impl Into<String>, code: &str) -> Self {
        HostResponse::Failure {
            success: false,
            error: error.into(),
            code: code.to_string(),
            details: None,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            HostResponse::Synthesized { success, .. }
            | HostResponse::Voices { success, .. }
            | HostResponse::StoredVoices { success, .. }
            | HostResponse::Health { success, .. }
            | HostResponse::Downloaded { success, .. }
            | HostResponse::Removed { success, .. }
            | HostResponse::Audio { success, .. }
            | HostResponse::Released { success, .. }
            | HostResponse::Failure { success, .. } => *success,
        }
    }
}

/// Dispatches host messages onto the orchestrator and its components
#[derive(Clone)]
pub struct TtsHost {
    orchestrator: SynthesisOrchestrator,
}

impl TtsHost {
    pub fn new(orchestrator: SynthesisOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &SynthesisOrchestrator {
        &self.orchestrator
    }

    /// Parse and handle one JSON message, returning the JSON response
    pub async fn handle_json(&self, raw: &str) -> String {
        let response = match serde_json::from_str::<HostRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(target: "host", error = %e, "Rejecting malformed request");
                HostResponse::rejected(format!("Invalid request: {}", e), "INVALID_REQUEST")
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"error":"Failed to encode response: {}","code":"SERIALIZATION_ERROR"}}"#,
                e
            )
        })
    }

    pub async fn handle(&self, request: HostRequest) -> HostResponse {
        self.handle_with(request, None, CancellationFlag::new())
            .await
    }

    /// Handle a request, streaming synthesis progress to `events`
    pub async fn handle_with(
        &self,
        request: HostRequest,
        events: Option<mpsc::UnboundedSender<SynthesisEvent>>,
        cancel: CancellationFlag,
    ) -> HostResponse {
        let action = request.action();
        debug!(target: "host", action, "Handling request");
        let result = match request {
            HostRequest::Synthesize {
                text,
                options,
                unlimited_storage_allowed,
            } => {
                let request = SynthesisRequest {
                    text,
                    language: options.language.unwrap_or_else(|| "auto".to_string()),
                    voice: options.voice,
                    unlimited_storage_allowed,
                };
                self.synthesize(request, events, cancel).await
            }
            HostRequest::ListVoices => self.list_voices().await,
            HostRequest::ListStoredVoices => self.list_stored().await,
            HostRequest::HealthCheck => Ok(self.health().await),
            HostRequest::DownloadVoice { voice_id } => self.download_voice(&voice_id).await,
            HostRequest::RemoveVoice { voice_id } => self.remove_voice(&voice_id).await,
            HostRequest::FetchAudio { storage_key } => self.fetch_audio(storage_key).await,
            HostRequest::ReleaseAudio { storage_key } => self.release_audio(storage_key).await,
        };

        result.unwrap_or_else(|e| {
            warn!(target: "host", action, code = e.code(), error = %e, "Request failed");
            HostResponse::failure(&e)
        })
    }

    async fn synthesize(
        &self,
        request: SynthesisRequest,
        events: Option<mpsc::UnboundedSender<SynthesisEvent>>,
        cancel: CancellationFlag,
    ) -> Result<HostResponse> {
        let outcome = self.orchestrator.synthesize(request, events, cancel).await?;
        let envelope = outcome.envelope;
        Ok(HostResponse::Synthesized {
            success: true,
            method: envelope.mode.as_str(),
            audio_data: envelope.payload,
            storage_key: envelope.storage_key,
            size: envelope.size,
            voice_id: outcome.voice_id,
            language: outcome.language,
            chunks: outcome.chunks,
            sample_rate: outcome.format.sample_rate,
            duration_ms: outcome.duration_ms,
            warnings: outcome.warnings,
        })
    }

    async fn list_voices(&self) -> Result<HostResponse> {
        let catalog = self.orchestrator.cache().worker().voices().await?;
        Ok(HostResponse::Voices {
            success: true,
            voices: selectable_voices(&catalog),
        })
    }

    async fn list_stored(&self) -> Result<HostResponse> {
        Ok(HostResponse::StoredVoices {
            success: true,
            voices: self.orchestrator.cache().stored_set().await?,
        })
    }

    async fn health(&self) -> HostResponse {
        let worker = match self.orchestrator.cache().worker().lifecycle().await {
            Lifecycle::Uninitialized => "uninitialized".to_string(),
            Lifecycle::Initializing => "initializing".to_string(),
            Lifecycle::Ready => "ready".to_string(),
            Lifecycle::Terminated(reason) => format!("terminated ({})", reason),
        };
        HostResponse::Health {
            success: true,
            ready: true,
            worker,
        }
    }

    async fn download_voice(&self, voice_id: &str) -> Result<HostResponse> {
        require_canonical(voice_id)?;
        let cache = self.orchestrator.cache();
        let progress = |percent: u8| {
            debug!(target: "host", voice = %voice_id, percent, "Voice download progress");
        };

        let availability = cache.ensure_available(voice_id, &progress).await?;
        if availability == Availability::Downloaded && !cache.verify_integrity(voice_id).await? {
            warn!(target: "host", voice = %voice_id, "Fresh download failed smoke test; re-downloading");
            cache.evict_and_redownload(voice_id, &progress).await?;
            if !cache.verify_integrity(voice_id).await? {
                return Err(TtsError::ModelCorruption {
                    voice_id: voice_id.to_string(),
                    message: "smoke test failed after re-download".to_string(),
                });
            }
        }

        info!(target: "host", voice = %voice_id, ?availability, "Voice available");
        Ok(HostResponse::Downloaded {
            success: true,
            voice_id: voice_id.to_string(),
            downloaded: availability == Availability::Downloaded,
        })
    }

    async fn remove_voice(&self, voice_id: &str) -> Result<HostResponse> {
        require_canonical(voice_id)?;
        let outcome = self.orchestrator.cache().remove(voice_id).await?;
        Ok(HostResponse::Removed {
            success: true,
            voice_id: voice_id.to_string(),
            removed: outcome == RemoveOutcome::Removed,
        })
    }

    async fn fetch_audio(&self, storage_key: String) -> Result<HostResponse> {
        match self.orchestrator.transport().fetch(&storage_key).await? {
            Some(bytes) => Ok(HostResponse::Audio {
                success: true,
                size: bytes.len(),
                storage_key,
                audio_data: bytes,
            }),
            None => Ok(HostResponse::rejected(
                format!("No stored audio under key {}", storage_key),
                "NOT_FOUND",
            )),
        }
    }

    async fn release_audio(&self, storage_key: String) -> Result<HostResponse> {
        let released = self.orchestrator.transport().release(&storage_key).await?;
        Ok(HostResponse::Released {
            success: true,
            storage_key,
            released,
        })
    }
}

fn require_canonical(voice_id: &str) -> Result<()> {
    if is_canonical_voice_id(voice_id) {
        Ok(())
    } else {
        Err(TtsError::VoiceResolution(format!(
            "'{}' is not a canonical voice id",
            voice_id
        )))
    }
}
