//! Voice resolution: reference parsing, language tables and catalog ordering.

pub mod catalog;
pub mod resolver;
pub mod tables;

pub use catalog::{selectable_voices, VoiceCatalog};
pub use resolver::{VoiceRef, VoiceResolver, VoiceSelection};
pub use tables::{is_canonical_voice_id, normalize_language};
