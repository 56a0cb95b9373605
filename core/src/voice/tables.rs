//! Static language and voice tables.

use once_cell::sync::Lazy;
use regex::Regex;

/// Languages with at least one selectable voice, in listing order
pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "ru", "uk", "de", "fr", "es", "it", "pt", "pl", "nl", "zh"];

/// Used when nothing else resolves; must stay canonical
pub const LAST_RESORT_VOICE: &str = "en_US-lessac-medium";

const DEFAULT_VOICES: &[(&str, &str)] = &[
    ("en", "en_US-hfc_female-medium"),
    ("ru", "ru_RU-irina-medium"),
    ("uk", "uk_UA-ukrainian_tts-medium"),
    ("de", "de_DE-thorsten-medium"),
    ("fr", "fr_FR-siwis-medium"),
    ("es", "es_ES-davefx-medium"),
    ("it", "it_IT-paola-medium"),
    ("pt", "pt_BR-faber-medium"),
    ("pl", "pl_PL-darkman-medium"),
    ("nl", "nl_BE-nathalie-medium"),
    ("zh", "zh_CN-huayan-medium"),
];

const FALLBACK_VOICES: &[(&str, &str)] = &[
    ("en", "en_US-lessac-medium"),
    ("ru", "ru_RU-denis-medium"),
    ("de", "de_DE-thorsten_emotional-medium"),
    ("fr", "fr_FR-upmc-medium"),
    ("es", "es_ES-sharvard-medium"),
    ("pl", "pl_PL-gosia-medium"),
    ("nl", "nl_NL-mls-medium"),
];

// Alternate spellings and ISO 639-2 codes
const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("ua", "uk"),
    ("ukr", "uk"),
    ("eng", "en"),
    ("rus", "ru"),
    ("ger", "de"),
    ("deu", "de"),
    ("fra", "fr"),
    ("fre", "fr"),
    ("spa", "es"),
    ("ita", "it"),
    ("por", "pt"),
    ("pol", "pl"),
    ("dut", "nl"),
    ("nld", "nl"),
    ("chi", "zh"),
    ("zho", "zh"),
    ("cn", "zh"),
    ("jp", "ja"),
    ("kr", "ko"),
];

/// Friendly names accepted in place of a canonical id
const VOICE_NAME_ALIASES: &[(&str, &str)] = &[
    ("amy", "en_US-amy-medium"),
    ("lessac", "en_US-lessac-medium"),
    ("ryan", "en_US-ryan-medium"),
    ("hfc female", "en_US-hfc_female-medium"),
    ("hfc_female", "en_US-hfc_female-medium"),
    ("alan", "en_GB-alan-medium"),
    ("irina", "ru_RU-irina-medium"),
    ("denis", "ru_RU-denis-medium"),
    ("dmitri", "ru_RU-dmitri-medium"),
    ("ruslan", "ru_RU-ruslan-medium"),
    ("ukrainian", "uk_UA-ukrainian_tts-medium"),
    ("thorsten", "de_DE-thorsten-medium"),
    ("siwis", "fr_FR-siwis-medium"),
    ("davefx", "es_ES-davefx-medium"),
    ("paola", "it_IT-paola-medium"),
    ("faber", "pt_BR-faber-medium"),
    ("darkman", "pl_PL-darkman-medium"),
    ("nathalie", "nl_BE-nathalie-medium"),
    ("huayan", "zh_CN-huayan-medium"),
];

static CANONICAL_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]+_[A-Za-z0-9]+-[A-Za-z0-9_]+-[A-Za-z0-9_]+$").expect("voice id regex")
});

/// `<lang>_<REGION>-<name>-<quality>`; never empty or the literal "undefined"
pub fn is_canonical_voice_id(id: &str) -> bool {
    !id.is_empty() && id != "undefined" && CANONICAL_ID.is_match(id)
}

/// Reduce a language tag to its canonical base code (`en-US` -> `en`, `ua` -> `uk`)
pub fn normalize_language(code: &str) -> String {
    let base = code
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == base)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(base)
}

/// Position in [`SUPPORTED_LANGUAGES`]
pub fn language_rank(code: &str) -> Option<usize> {
    SUPPORTED_LANGUAGES.iter().position(|l| *l == code)
}

pub fn default_voice(language: &str) -> Option<&'static str> {
    lookup(DEFAULT_VOICES, language)
}

pub fn fallback_voice(language: &str) -> Option<&'static str> {
    lookup(FALLBACK_VOICES, language)
}

pub fn voice_for_alias(name: &str) -> Option<&'static str> {
    let key = name.trim().to_lowercase();
    lookup(VOICE_NAME_ALIASES, &key)
}

/// Language prefix of a canonical id (`en` for `en_US-amy-medium`)
pub fn voice_language(voice_id: &str) -> String {
    normalize_language(voice_id.split('-').next().unwrap_or_default())
}

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}
