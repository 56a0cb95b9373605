// ClipVoice Core Library
// On-device text-to-speech synthesis orchestration

pub mod audio;
pub mod cache;
pub mod config;
pub mod engine;
pub mod host;
pub mod orchestrator;
pub mod telemetry;
pub mod text;
pub mod transport;
pub mod voice;
pub mod worker;

// Export core types
pub use audio::{AudioResult, WavFormat};
pub use cache::ModelCacheManager;
pub use config::TtsConfig;
pub use engine::{EngineError, EngineFactory, InferenceEngine, Quality, VoiceDescriptor};
pub use host::{HostRequest, HostResponse, TtsHost};
pub use orchestrator::{CancellationFlag, SynthesisEvent, SynthesisOrchestrator, SynthesisRequest};
pub use transport::{TransportEnvelope, TransportMode, TransportSelector};
pub use voice::{VoiceRef, VoiceResolver, VoiceSelection};
pub use worker::WorkerCoordinator;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot of the model store taken when a download could not be confirmed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDiagnostics {
    pub requested: String,
    pub stored_before: Vec<String>,
    pub stored_after: Vec<String>,
    pub last_progress: Option<u8>,
    pub attempts: u32,
}

// Error types
#[derive(Error, Debug)]
pub enum TtsError {
    #[error("No speakable text left after sanitization")]
    EmptyText,

    #[error("Voice resolution error: {0}")]
    VoiceResolution(String),

    #[error(
        "Voice model {} is not present in storage after download ({} checks)",
        .0.requested,
        .0.attempts
    )]
    ModelStorage(Box<StorageDiagnostics>),

    #[error("Voice model {voice_id} appears corrupted: {message}")]
    ModelCorruption { voice_id: String, message: String },

    #[error("Inference worker failed to initialize: {0}")]
    WorkerInit(String),

    #[error("Inference worker call '{kind}' timed out after {timeout_ms}ms")]
    WorkerTimeout { kind: &'static str, timeout_ms: u64 },

    #[error("Text could not be phonemized for voice {voice_id}: {message}")]
    Phonemization { voice_id: String, message: String },

    #[error("Audio payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Storage quota exceeded: {0}")]
    StorageQuota(String),

    #[error("Inference engine error: {0}")]
    Engine(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Synthesis cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TtsError {
    /// Machine-readable code for the calling UI to branch on
    pub fn code(&self) -> &'static str {
        match self {
            TtsError::EmptyText => "EMPTY_TEXT",
            TtsError::VoiceResolution(_) => "VOICE_RESOLUTION_FAILED",
            TtsError::ModelStorage(_) => "MODEL_STORAGE_VERIFICATION_FAILED",
            TtsError::ModelCorruption { .. } => "MODEL_CORRUPTED",
            TtsError::WorkerInit(_) => "WORKER_INIT_FAILED",
            TtsError::WorkerTimeout { .. } => "WORKER_TIMEOUT",
            TtsError::Phonemization { .. } => "PHONEMIZATION_FAILED",
            TtsError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            TtsError::StorageQuota(_) => "STORAGE_QUOTA_EXCEEDED",
            TtsError::Engine(_) => "ENGINE_ERROR",
            TtsError::Storage(_) => "STORAGE_ERROR",
            TtsError::Audio(_) => "AUDIO_ERROR",
            TtsError::Cancelled => "CANCELLED",
            TtsError::Config(_) => "CONFIG_ERROR",
            TtsError::Io(_) => "IO_ERROR",
            TtsError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Errors recovered locally through retry or voice fallback
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TtsError::ModelCorruption { .. } | TtsError::Phonemization { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TtsError>;
