//! Text preparation: sanitization, language detection and chunk planning.

pub mod detect;
pub mod sanitize;
pub mod segment;

pub use detect::detect_language;
pub use sanitize::{sanitize, sanitize_strict};
pub use segment::{plan_chunks, segment, should_segment, TextChunk};
