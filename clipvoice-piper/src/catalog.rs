//! Parsing of the Piper voice repository catalog (`voices.json`).

use clipvoice_core::{Quality, VoiceDescriptor};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct PiperLanguage {
    /// Locale, e.g. `en_US`
    pub code: String,
    /// Base language, e.g. `en`
    pub family: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub name_english: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PiperFile {
    #[serde(default)]
    pub size_bytes: u64,
}

/// One catalog entry
#[derive(Debug, Clone, Deserialize)]
pub struct PiperVoice {
    pub key: String,
    pub name: String,
    pub language: PiperLanguage,
    pub quality: String,
    #[serde(default)]
    pub files: HashMap<String, PiperFile>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl PiperVoice {
    fn file_with_suffix(&self, suffix: &str) -> String {
        self.files
            .keys()
            .find(|path| path.ends_with(suffix))
            .cloned()
            .unwrap_or_else(|| {
                format!(
                    "{}/{}/{}/{}/{}{}",
                    self.language.family,
                    self.language.code,
                    self.name,
                    self.quality,
                    self.key,
                    suffix
                )
            })
    }

    /// Repository-relative path of the model
    pub fn model_file(&self) -> String {
        self.file_with_suffix(".onnx")
    }

    /// Repository-relative path of the model's config
    pub fn config_file(&self) -> String {
        self.file_with_suffix(".onnx.json")
    }

    /// `None` for qualities the core does not model
    pub fn descriptor(&self) -> Option<VoiceDescriptor> {
        let quality = Quality::parse(&self.quality)?;
        let speaker = title_case(&self.name.replace('_', " "));
        let display_name = match (self.language.name_english.is_empty(), self.language.region.is_empty()) {
            (false, false) => format!(
                "{} ({}, {})",
                speaker, self.language.name_english, self.language.region
            ),
            (false, true) => format!("{} ({})", speaker, self.language.name_english),
            _ => speaker,
        };
        Some(VoiceDescriptor {
            id: self.key.clone(),
            display_name,
            language_code: self.language.family.to_ascii_lowercase(),
            quality,
            aliases: self.aliases.clone(),
        })
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `voices.json`, keyed by voice id
pub fn parse_catalog(raw: &[u8]) -> serde_json::Result<Vec<PiperVoice>> {
    let map: HashMap<String, PiperVoice> = serde_json::from_slice(raw)?;
    let mut voices: Vec<PiperVoice> = map.into_values().collect();
    voices.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(voices)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "en_US-hfc_female-medium": {
            "key": "en_US-hfc_female-medium",
            "name": "hfc_female",
            "language": {"code": "en_US", "family": "en", "region": "US", "name_english": "English"},
            "quality": "medium",
            "num_speakers": 1,
            "files": {
                "en/en_US/hfc_female/medium/en_US-hfc_female-medium.onnx": {"size_bytes": 63201294},
                "en/en_US/hfc_female/medium/en_US-hfc_female-medium.onnx.json": {"size_bytes": 4882},
                "en/en_US/hfc_female/medium/MODEL_CARD": {"size_bytes": 300}
            },
            "aliases": []
        },
        "uk_UA-lada-x_low": {
            "key": "uk_UA-lada-x_low",
            "name": "lada",
            "language": {"code": "uk_UA", "family": "uk", "region": "UA", "name_english": "Ukrainian"},
            "quality": "x_low",
            "files": {},
            "aliases": ["lada"]
        }
    }"#;

    #[test]
    fn test_parse_and_describe() {
        let voices = parse_catalog(SAMPLE.as_bytes()).unwrap();
        assert_eq!(voices.len(), 2);

        let hfc = &voices[0];
        assert_eq!(
            hfc.model_file(),
            "en/en_US/hfc_female/medium/en_US-hfc_female-medium.onnx"
        );
        assert_eq!(
            hfc.config_file(),
            "en/en_US/hfc_female/medium/en_US-hfc_female-medium.onnx.json"
        );
        let d = hfc.descriptor().unwrap();
        assert_eq!(d.display_name, "Hfc Female (English, US)");
        assert_eq!(d.language_code, "en");
        assert_eq!(d.quality, Quality::Medium);

        let lada = voices[1].descriptor().unwrap();
        assert_eq!(lada.quality, Quality::Low);
        assert_eq!(lada.aliases, vec!["lada".to_string()]);
    }

    #[test]
    fn test_constructed_paths_without_file_list() {
        let voices = parse_catalog(SAMPLE.as_bytes()).unwrap();
        assert_eq!(voices[1].model_file(), "uk/uk_UA/lada/x_low/uk_UA-lada-x_low.onnx");
    }
}
