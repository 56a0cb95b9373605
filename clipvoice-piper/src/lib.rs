//! Piper-backed inference engine for ClipVoice.
//!
//! Synthesis shells out to the `piper` CLI; voice models come from the Piper
//! voice repository and are kept under [`PiperConfig::voice_dir`].

pub mod catalog;
pub mod config;
pub mod engine;

pub use catalog::{parse_catalog, PiperVoice};
pub use config::PiperConfig;
pub use engine::PiperEngine;

use clipvoice_core::{EngineError, EngineFactory, InferenceEngine};
use std::sync::Arc;

/// Factory handing the coordinator a fresh [`PiperEngine`] per worker boot
pub fn factory(config: PiperConfig) -> Arc<dyn EngineFactory> {
    Arc::new(move || -> Result<Box<dyn InferenceEngine>, EngineError> {
        Ok(Box::new(PiperEngine::new(config.clone())))
    })
}
