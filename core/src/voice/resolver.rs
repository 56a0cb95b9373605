use super::catalog::{selectable_voices, VoiceCatalog};
use super::tables::{
    default_voice, fallback_voice, is_canonical_voice_id, normalize_language, voice_for_alias,
    voice_language, LAST_RESORT_VOICE,
};
use crate::config::VoiceConfig;
use crate::engine::VoiceDescriptor;
use crate::text::detect_language;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// A user-supplied voice reference: canonical id, display name, or catalog index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoiceRef {
    Index(u64),
    Name(String),
}

enum RefKind<'a> {
    Canonical(&'a str),
    Index(usize),
    Name(&'a str),
    Empty,
}

impl VoiceRef {
    fn kind(&self) -> RefKind<'_> {
        match self {
            VoiceRef::Index(i) => RefKind::Index(*i as usize),
            VoiceRef::Name(s) => {
                let s = s.trim();
                if s.is_empty() || s == "undefined" || s == "null" {
                    RefKind::Empty
                } else if is_canonical_voice_id(s) {
                    RefKind::Canonical(s)
                } else if s.chars().all(|c| c.is_ascii_digit()) {
                    s.parse::<usize>().map_or(RefKind::Name(s), RefKind::Index)
                } else {
                    RefKind::Name(s)
                }
            }
        }
    }
}

/// Resolved voice for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelection {
    /// Always canonical
    pub voice_id: String,
    /// The user's reference could not be honoured as given
    pub is_fallback: bool,
    /// Base code of the text language
    pub source_language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Maps a voice reference plus language onto a canonical voice id
#[derive(Debug, Clone)]
pub struct VoiceResolver {
    default_language: String,
}

impl VoiceResolver {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            default_language: normalize_language(&config.default_language),
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Detect (for `auto`) and normalize the request language
    pub fn resolve_language(&self, language: &str, text: &str) -> String {
        let trimmed = language.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            let detected = detect_language(text, &self.default_language);
            debug!(target: "voice", language = %detected, "Detected text language");
            normalize_language(&detected)
        } else {
            normalize_language(trimmed)
        }
    }

    /// Resolve `voice_ref` for text in `language` (already passed through `resolve_language`)
    pub async fn resolve(
        &self,
        voice_ref: Option<&VoiceRef>,
        language: &str,
        catalog: &dyn VoiceCatalog,
    ) -> VoiceSelection {
        let mut warnings = Vec::new();
        let kind = voice_ref.map_or(RefKind::Empty, VoiceRef::kind);

        let explicit = match kind {
            RefKind::Canonical(id) => {
                let voice_lang = voice_language(id);
                if voice_lang != language {
                    warn!(
                        target: "voice",
                        voice = %id,
                        voice_language = %voice_lang,
                        text_language = %language,
                        "Selected voice language differs from text language; keeping user choice"
                    );
                    warnings.push(format!(
                        "Voice {} speaks '{}' but the text looks like '{}'",
                        id, voice_lang, language
                    ));
                }
                return VoiceSelection {
                    voice_id: id.to_string(),
                    is_fallback: false,
                    source_language: language.to_string(),
                    warnings,
                };
            }
            RefKind::Name(name) => {
                let found = match voice_for_alias(name) {
                    Some(id) => Some(id.to_string()),
                    None => self.lookup_by_name(name, language, catalog).await,
                };
                if found.is_none() {
                    warn!(target: "voice", reference = %name, "Unknown voice name; using language default");
                    warnings.push(format!("Voice '{}' not found; using default voice", name));
                }
                Some(found)
            }
            RefKind::Index(index) => {
                let found = self.lookup_by_index(index, catalog).await;
                if found.is_none() {
                    warn!(target: "voice", index, "Voice index out of range; using language default");
                    warnings.push(format!(
                        "Voice index {} is out of range; using default voice",
                        index
                    ));
                }
                Some(found)
            }
            RefKind::Empty => None,
        };

        let requested = explicit.is_some();
        if let Some(Some(id)) = explicit {
            if is_canonical_voice_id(&id) {
                return VoiceSelection {
                    voice_id: id,
                    is_fallback: false,
                    source_language: language.to_string(),
                    warnings,
                };
            }
            warn!(target: "voice", voice = %id, "Resolved voice id is not canonical; using default");
        }

        if let Some(id) = default_voice(language) {
            return VoiceSelection {
                voice_id: id.to_string(),
                is_fallback: requested,
                source_language: language.to_string(),
                warnings,
            };
        }

        if let Some(id) = default_voice(&self.default_language) {
            info!(
                target: "voice",
                language = %language,
                fallback_language = %self.default_language,
                "No voice for language; using global default"
            );
            warnings.push(format!(
                "No voice available for '{}'; using '{}' voice",
                language, self.default_language
            ));
            return VoiceSelection {
                voice_id: id.to_string(),
                is_fallback: true,
                source_language: language.to_string(),
                warnings,
            };
        }

        error!(
            target: "voice",
            language = %language,
            default_language = %self.default_language,
            voice = LAST_RESORT_VOICE,
            "Voice resolution reached the last-resort voice"
        );
        warnings.push(format!("Using last-resort voice {}", LAST_RESORT_VOICE));
        VoiceSelection {
            voice_id: LAST_RESORT_VOICE.to_string(),
            is_fallback: true,
            source_language: language.to_string(),
            warnings,
        }
    }

    /// Next voice to try after `current` failed for text in `language`
    pub fn fallback_for(&self, language: &str, current: &str) -> Option<String> {
        let candidates = [
            default_voice(language),
            fallback_voice(language),
            default_voice(&self.default_language),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|id| *id != current)
            .map(str::to_string)
    }

    async fn load_catalog(&self, catalog: &dyn VoiceCatalog) -> Vec<VoiceDescriptor> {
        match catalog.catalog().await {
            Ok(voices) => voices,
            Err(e) => {
                warn!(target: "voice", error = %e, "Voice catalog unavailable during resolution");
                Vec::new()
            }
        }
    }

    async fn lookup_by_index(&self, index: usize, catalog: &dyn VoiceCatalog) -> Option<String> {
        let voices = selectable_voices(&self.load_catalog(catalog).await);
        voices.get(index).map(|v| v.id.clone())
    }

    async fn lookup_by_name(
        &self,
        name: &str,
        language: &str,
        catalog: &dyn VoiceCatalog,
    ) -> Option<String> {
        let voices = self.load_catalog(catalog).await;
        let needle = name.to_lowercase();

        let exact = voices.iter().find(|v| {
            v.id.to_lowercase() == needle
                || v.display_name.to_lowercase() == needle
                || v.aliases.iter().any(|a| a.to_lowercase() == needle)
        });
        if let Some(v) = exact {
            return Some(v.id.clone());
        }

        let mut partial: Vec<&VoiceDescriptor> = voices
            .iter()
            .filter(|v| {
                v.id.to_lowercase().contains(&needle)
                    || v.display_name.to_lowercase().contains(&needle)
                    || v.aliases.iter().any(|a| a.to_lowercase().contains(&needle))
            })
            .collect();
        // prefer the text language, then better quality
        partial.sort_by_key(|v| (v.language_code != language, v.quality.rank(), v.id.clone()));
        partial.first().map(|v| v.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;

    struct StaticCatalog(Vec<VoiceDescriptor>);

    #[async_trait]
    impl VoiceCatalog for StaticCatalog {
        async fn catalog(&self) -> Result<Vec<VoiceDescriptor>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl VoiceCatalog for BrokenCatalog {
        async fn catalog(&self) -> Result<Vec<VoiceDescriptor>> {
            Err(crate::TtsError::Engine("offline".into()))
        }
    }

    fn resolver() -> VoiceResolver {
        VoiceResolver::new(&VoiceConfig {
            default_language: "en".into(),
        })
    }

    fn catalog() -> StaticCatalog {
        let mut amy = VoiceDescriptor::from_id("en_US-amy-medium", "Amy").unwrap();
        amy.aliases.push("amy-voice".into());
        StaticCatalog(vec![
            amy,
            VoiceDescriptor::from_id("en_US-ryan-high", "Ryan").unwrap(),
            VoiceDescriptor::from_id("en_GB-cori-medium", "Cori").unwrap(),
            VoiceDescriptor::from_id("ru_RU-irina-medium", "Irina").unwrap(),
            VoiceDescriptor::from_id("de_DE-kerstin-low", "Kerstin").unwrap(),
        ])
    }

    #[tokio::test]
    async fn test_canonical_id_is_sticky() {
        let r = resolver();
        let voice = VoiceRef::Name("ru_RU-irina-medium".into());
        let sel = r.resolve(Some(&voice), "en", &BrokenCatalog).await;
        assert_eq!(sel.voice_id, "ru_RU-irina-medium");
        assert!(!sel.is_fallback);
        assert_eq!(sel.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_name_lookup() {
        let r = resolver();
        let sel = r
            .resolve(Some(&VoiceRef::Name("Cori".into())), "en", &catalog())
            .await;
        assert_eq!(sel.voice_id, "en_GB-cori-medium");

        let sel = r
            .resolve(Some(&VoiceRef::Name("amy-voice".into())), "en", &catalog())
            .await;
        assert_eq!(sel.voice_id, "en_US-amy-medium");

        // static alias table does not need the catalog
        let sel = r
            .resolve(Some(&VoiceRef::Name("Irina".into())), "ru", &BrokenCatalog)
            .await;
        assert_eq!(sel.voice_id, "ru_RU-irina-medium");
    }

    #[tokio::test]
    async fn test_partial_id_matches_substring() {
        let r = resolver();
        let sel = r
            .resolve(Some(&VoiceRef::Name("en_US-ryan".into())), "en", &catalog())
            .await;
        assert_eq!(sel.voice_id, "en_US-ryan-high");
    }

    #[tokio::test]
    async fn test_numeric_index_uses_selectable_order() {
        let r = resolver();
        // selectable order: ryan-high, amy-medium, cori-medium, irina-medium
        let sel = r.resolve(Some(&VoiceRef::Index(0)), "en", &catalog()).await;
        assert_eq!(sel.voice_id, "en_US-ryan-high");
        let sel = r
            .resolve(Some(&VoiceRef::Name("3".into())), "en", &catalog())
            .await;
        assert_eq!(sel.voice_id, "ru_RU-irina-medium");
    }

    #[tokio::test]
    async fn test_numeric_index_out_of_range_uses_default() {
        let r = resolver();
        let sel = r
            .resolve(Some(&VoiceRef::Name("27".into())), "en", &catalog())
            .await;
        assert_eq!(sel.voice_id, "en_US-hfc_female-medium");
        assert!(sel.is_fallback);
        assert!(sel.warnings[0].contains("out of range"));
    }

    #[tokio::test]
    async fn test_unsupported_language_uses_global_default() {
        let r = resolver();
        let sel = r.resolve(None, "ja", &catalog()).await;
        assert_eq!(sel.voice_id, "en_US-hfc_female-medium");
        assert!(sel.is_fallback);
        assert_eq!(sel.source_language, "ja");
    }

    #[tokio::test]
    async fn test_empty_references_never_leak() {
        let r = resolver();
        for reference in ["", "undefined", "null", "   "] {
            let sel = r
                .resolve(Some(&VoiceRef::Name(reference.into())), "de", &BrokenCatalog)
                .await;
            assert_eq!(sel.voice_id, "de_DE-thorsten-medium");
            assert!(is_canonical_voice_id(&sel.voice_id));
            assert!(!sel.is_fallback);
        }
    }

    #[tokio::test]
    async fn test_resolve_language() {
        let r = resolver();
        assert_eq!(r.resolve_language("auto", "Hello. World!"), "en");
        assert_eq!(r.resolve_language("auto", "Привет, мир"), "ru");
        assert_eq!(r.resolve_language("pt-BR", ""), "pt");
    }

    #[test]
    fn test_fallback_chain() {
        let r = resolver();
        assert_eq!(
            r.fallback_for("en", "en_US-amy-medium").as_deref(),
            Some("en_US-hfc_female-medium")
        );
        assert_eq!(
            r.fallback_for("en", "en_US-hfc_female-medium").as_deref(),
            Some("en_US-lessac-medium")
        );
        assert_eq!(
            r.fallback_for("zh", "zh_CN-huayan-medium").as_deref(),
            Some("en_US-hfc_female-medium")
        );
    }
}
