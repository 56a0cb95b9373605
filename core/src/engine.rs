//! Inference engine boundary.
//!
//! The neural engine runs inside the dedicated worker thread owned by
//! [`crate::worker::WorkerCoordinator`]. Engines are created through an
//! [`EngineFactory`] so an idle-terminated worker can be booted again with a
//! fresh instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Quality tier of a voice model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    /// Parse an engine quality label; `x_low` folds into `Low`
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "x_low" | "xlow" | "x-low" | "low" => Some(Quality::Low),
            "medium" => Some(Quality::Medium),
            "high" => Some(Quality::High),
            _ => None,
        }
    }

    /// Sort rank used by the selectable-voice listing (best first)
    pub fn rank(self) -> u8 {
        match self {
            Quality::High => 0,
            Quality::Medium => 1,
            Quality::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the engine's voice catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceDescriptor {
    /// Canonical id, `<lang>_<REGION>-<name>-<quality>`
    pub id: String,
    pub display_name: String,
    /// Base two-letter language code
    pub language_code: String,
    pub quality: Quality,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl VoiceDescriptor {
    /// Build a descriptor from a canonical id, deriving language and quality from it
    pub fn from_id(id: &str, display_name: &str) -> Option<Self> {
        let (locale, rest) = id.split_once('-')?;
        let language_code = locale.split('_').next()?.to_ascii_lowercase();
        let quality = Quality::parse(rest.rsplit('-').next()?)?;
        Some(Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            language_code,
            quality,
            aliases: Vec::new(),
        })
    }

    /// Speaker name segment of the id (`lessac` in `en_US-lessac-medium`)
    pub fn speaker(&self) -> &str {
        let mut parts = self.id.splitn(2, '-');
        parts.next();
        parts
            .next()
            .and_then(|rest| rest.rsplit_once('-').map(|(name, _)| name))
            .unwrap_or(&self.id)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine does not expose this primitive at all
    #[error("Operation not supported by engine: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        EngineError::Failed(message.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Failed(e.to_string())
    }
}

/// Neural speech engine hosted on the inference worker thread.
///
/// Calls are issued strictly one at a time by the worker loop.
#[async_trait]
pub trait InferenceEngine: Send {
    /// One-time setup after the worker signalled readiness
    async fn init(&mut self) -> Result<(), EngineError>;

    /// Synthesize `text` with a locally stored voice, returning WAV container bytes
    async fn predict(&mut self, text: &str, voice_id: &str) -> Result<Vec<u8>, EngineError>;

    /// Full voice catalog
    async fn voices(&mut self) -> Result<Vec<VoiceDescriptor>, EngineError>;

    /// Canonical ids of models materialized locally
    async fn stored(&mut self) -> Result<Vec<String>, EngineError>;

    /// Fetch and persist a model; `progress` receives fractions in `0.0..=1.0`
    async fn download(
        &mut self,
        voice_id: &str,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<(), EngineError>;

    async fn remove(&mut self, voice_id: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported(format!("remove({})", voice_id)))
    }

    /// Drop the engine's loaded model session so the next predict reloads by voice
    async fn clear_session_cache(&mut self) -> Result<(), EngineError>;
}

/// Creates a fresh engine for every worker boot
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn InferenceEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn InferenceEngine>, EngineError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn InferenceEngine>, EngineError> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_parse_and_rank() {
        assert_eq!(Quality::parse("x_low"), Some(Quality::Low));
        assert_eq!(Quality::parse("MEDIUM"), Some(Quality::Medium));
        assert_eq!(Quality::parse("ultra"), None);
        assert!(Quality::High.rank() < Quality::Medium.rank());
        assert!(Quality::Medium >= Quality::Medium);
        assert!(Quality::Low < Quality::Medium);
    }

    #[test]
    fn test_descriptor_from_id() {
        let d = VoiceDescriptor::from_id("en_US-hfc_female-medium", "HFC Female").unwrap();
        assert_eq!(d.language_code, "en");
        assert_eq!(d.quality, Quality::Medium);
        assert_eq!(d.speaker(), "hfc_female");
        assert!(VoiceDescriptor::from_id("nonsense", "x").is_none());
    }
}
