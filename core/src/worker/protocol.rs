//! Messages exchanged between the coordinator and the inference worker thread.
//!
//! Every request carries a correlation id. The worker answers with zero or more
//! `Progress` bodies followed by exactly one `Success` or `Error` body for that
//! id. Replies are typed per call kind and converted right after receipt.

use crate::engine::{EngineError, VoiceDescriptor};
use crate::{Result, TtsError};

pub type CallId = u64;

/// One engine primitive
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    Init,
    Predict { text: String, voice_id: String },
    ListVoices,
    ListStored,
    Download { voice_id: String },
    Remove { voice_id: String },
    ClearSessionCache,
}

impl WorkerCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerCommand::Init => "init",
            WorkerCommand::Predict { .. } => "predict",
            WorkerCommand::ListVoices => "list-voices",
            WorkerCommand::ListStored => "list-stored",
            WorkerCommand::Download { .. } => "download",
            WorkerCommand::Remove { .. } => "remove",
            WorkerCommand::ClearSessionCache => "clear-session-cache",
        }
    }

    /// Voice the command operates on, if any
    pub fn voice_id(&self) -> Option<&str> {
        match self {
            WorkerCommand::Predict { voice_id, .. }
            | WorkerCommand::Download { voice_id }
            | WorkerCommand::Remove { voice_id } => Some(voice_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub id: CallId,
    pub command: WorkerCommand,
}

/// Outbound traffic from the worker thread
#[derive(Debug)]
pub enum WorkerMessage {
    /// Engine constructed, ready for `Init`
    Ready,
    BootFailed(String),
    Response { id: CallId, body: ResponseBody },
}

#[derive(Debug)]
pub enum ResponseBody {
    Success(WorkerReply),
    /// Fraction in `0.0..=1.0`
    Progress(f32),
    Error(WorkerFault),
}

/// Successful result of one call
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Audio(Vec<u8>),
    Voices(Vec<VoiceDescriptor>),
    Stored(Vec<String>),
    Ack,
}

impl WorkerReply {
    fn variant(&self) -> &'static str {
        match self {
            WorkerReply::Audio(_) => "audio",
            WorkerReply::Voices(_) => "voices",
            WorkerReply::Stored(_) => "stored",
            WorkerReply::Ack => "ack",
        }
    }

    fn mismatch(self, expected: &str) -> TtsError {
        TtsError::Engine(format!(
            "Worker replied with {} where {} was expected",
            self.variant(),
            expected
        ))
    }

    pub fn into_audio(self) -> Result<Vec<u8>> {
        match self {
            WorkerReply::Audio(bytes) => Ok(bytes),
            other => Err(other.mismatch("audio")),
        }
    }

    pub fn into_voices(self) -> Result<Vec<VoiceDescriptor>> {
        match self {
            WorkerReply::Voices(voices) => Ok(voices),
            other => Err(other.mismatch("voices")),
        }
    }

    pub fn into_stored(self) -> Result<Vec<String>> {
        match self {
            WorkerReply::Stored(ids) => Ok(ids),
            other => Err(other.mismatch("stored")),
        }
    }

    pub fn into_ack(self) -> Result<()> {
        match self {
            WorkerReply::Ack => Ok(()),
            other => Err(other.mismatch("ack")),
        }
    }
}

// Engine-internal failures seen when a model file is truncated or mangled
const CORRUPTION_SIGNATURES: &[&str] = &[
    "aborted()",
    "runtimeerror: unreachable",
    "protobuf parsing failed",
    "invalid_protobuf",
    "failed to load model",
    "invalid model",
    "model file is corrupt",
];

// Phonemizer produced token ids the model does not know
const PHONEMIZATION_SIGNATURES: &[&str] = &["out of range", "index out of bounds", "phoneme"];

/// Error reported by the engine for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFault {
    pub message: String,
    /// The engine does not implement the primitive
    pub unsupported: bool,
}

impl WorkerFault {
    pub fn is_corruption(&self) -> bool {
        let lowered = self.message.to_lowercase();
        CORRUPTION_SIGNATURES.iter().any(|s| lowered.contains(s))
    }

    pub fn is_phonemization(&self) -> bool {
        let lowered = self.message.to_lowercase();
        PHONEMIZATION_SIGNATURES.iter().any(|s| lowered.contains(s))
    }

    /// Map onto the crate taxonomy for a call of `kind`
    pub fn into_error(self, kind: &str, voice_id: Option<&str>) -> TtsError {
        if kind == "init" {
            return TtsError::WorkerInit(self.message);
        }
        // only inference touches the model weights
        if kind != "predict" {
            return TtsError::Engine(format!("{} failed: {}", kind, self.message));
        }
        match voice_id {
            Some(voice) if self.is_corruption() => TtsError::ModelCorruption {
                voice_id: voice.to_string(),
                message: self.message,
            },
            Some(voice) if self.is_phonemization() => {
                TtsError::Phonemization {
                    voice_id: voice.to_string(),
                    message: self.message,
                }
            }
            _ => TtsError::Engine(format!("{} failed: {}", kind, self.message)),
        }
    }
}

impl From<EngineError> for WorkerFault {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Unsupported(message) => WorkerFault {
                message,
                unsupported: true,
            },
            EngineError::Failed(message) => WorkerFault {
                message,
                unsupported: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(message: &str) -> WorkerFault {
        WorkerFault::from(EngineError::failed(message))
    }

    #[test]
    fn test_corruption_signatures() {
        let err = fault("RuntimeError: Aborted(). Build with -sASSERTIONS")
            .into_error("predict", Some("en_US-amy-medium"));
        assert_eq!(err.code(), "MODEL_CORRUPTED");

        let err = fault("Protobuf parsing failed").into_error("predict", Some("en_US-amy-medium"));
        assert!(matches!(err, TtsError::ModelCorruption { .. }));
    }

    #[test]
    fn test_download_faults_are_engine_errors() {
        let err = fault("network unreachable").into_error("download", Some("en_US-amy-medium"));
        assert_eq!(err.code(), "ENGINE_ERROR");

        let err = fault("failed to load model").into_error("download", Some("en_US-amy-medium"));
        assert_eq!(err.code(), "ENGINE_ERROR");

        let err = fault("host unreachable").into_error("predict", Some("en_US-amy-medium"));
        assert_eq!(err.code(), "ENGINE_ERROR");

        let err = fault("RuntimeError: unreachable executed")
            .into_error("predict", Some("en_US-amy-medium"));
        assert_eq!(err.code(), "MODEL_CORRUPTED");
    }

    #[test]
    fn test_phonemization_only_on_predict() {
        let err = fault("index 212 out of range for embedding")
            .into_error("predict", Some("ru_RU-irina-medium"));
        assert_eq!(err.code(), "PHONEMIZATION_FAILED");

        let err = fault("index out of range").into_error("list-voices", None);
        assert_eq!(err.code(), "ENGINE_ERROR");
    }

    #[test]
    fn test_init_faults_are_worker_init() {
        let err = fault("wasm instantiate failed").into_error("init", None);
        assert_eq!(err.code(), "WORKER_INIT_FAILED");
    }

    #[test]
    fn test_unsupported_flag() {
        let f = WorkerFault::from(EngineError::Unsupported("remove".into()));
        assert!(f.unsupported);
        assert!(!fault("boom").unsupported);
    }

    #[test]
    fn test_reply_conversion_mismatch() {
        assert_eq!(WorkerReply::Audio(vec![1]).into_audio().unwrap(), vec![1]);
        let err = WorkerReply::Ack.into_stored().unwrap_err();
        assert!(err.to_string().contains("ack"));
    }
}
