//! Selectable voice listing shared by the catalog query and numeric voice selection.

use super::tables::language_rank;
use crate::engine::{Quality, VoiceDescriptor};
use crate::Result;
use async_trait::async_trait;

/// Source of the engine's voice catalog
#[async_trait]
pub trait VoiceCatalog: Send + Sync {
    async fn catalog(&self) -> Result<Vec<VoiceDescriptor>>;
}

/// Medium-or-better voices in supported languages, ordered by language rank,
/// quality rank, then display name.
///
/// Numeric voice references index into this exact ordering, so any change here
/// changes which voice an index selects.
pub fn selectable_voices(voices: &[VoiceDescriptor]) -> Vec<VoiceDescriptor> {
    let mut out: Vec<(usize, VoiceDescriptor)> = voices
        .iter()
        .filter(|v| v.quality >= Quality::Medium)
        .filter_map(|v| language_rank(&v.language_code).map(|rank| (rank, v.clone())))
        .collect();
    out.sort_by(|(ra, a), (rb, b)| {
        ra.cmp(rb)
            .then(a.quality.rank().cmp(&b.quality.rank()))
            .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
    out.into_iter().map(|(_, v)| v).collect()
}
