//! Piper engine configuration.
//!
//! Env overrides:
//! - PIPER_BIN, PIPER_VOICE_DIR
//! - PIPER_CATALOG_URL, PIPER_MODEL_BASE_URL
//! - TTS_TEMP_DIR

use std::path::PathBuf;

pub const DEFAULT_MODEL_BASE_URL: &str = "https://huggingface.co/rhasspy/piper-voices/resolve/main/";
pub const CATALOG_FILE: &str = "voices.json";

#[derive(Clone, Debug)]
pub struct PiperConfig {
    /// Piper executable; `None` when neither PIPER_BIN nor PATH has one
    pub piper_bin: Option<PathBuf>,
    /// Directory holding `<id>.onnx` + `<id>.onnx.json` pairs
    pub voice_dir: PathBuf,
    pub catalog_url: String,
    /// Prefix joined with the catalog's relative file paths
    pub model_base_url: String,
    /// Scratch directory for per-call WAV output
    pub temp_dir: PathBuf,
}

impl Default for PiperConfig {
    fn default() -> Self {
        let model_base_url = std::env::var("PIPER_MODEL_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_MODEL_BASE_URL.to_string());
        let model_base_url = if model_base_url.ends_with('/') {
            model_base_url
        } else {
            format!("{}/", model_base_url)
        };
        let catalog_url = std::env::var("PIPER_CATALOG_URL")
            .unwrap_or_else(|_| format!("{}{}", model_base_url, CATALOG_FILE));

        Self {
            piper_bin: get_from_env_or_path("PIPER_BIN", "piper"),
            voice_dir: std::env::var("PIPER_VOICE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("piper-voices")),
            catalog_url,
            model_base_url,
            temp_dir: std::env::var("TTS_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
        }
    }
}

impl PiperConfig {
    /// Defaults rooted at `voice_dir`, for tests and embedding
    pub fn with_voice_dir(voice_dir: impl Into<PathBuf>) -> Self {
        Self {
            voice_dir: voice_dir.into(),
            ..Self::default()
        }
    }

    pub fn model_path(&self, voice_id: &str) -> PathBuf {
        self.voice_dir.join(format!("{}.onnx", voice_id))
    }

    pub fn model_config_path(&self, voice_id: &str) -> PathBuf {
        self.voice_dir.join(format!("{}.onnx.json", voice_id))
    }
}

fn get_from_env_or_path(env_key: &str, default_bin: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    get_from_path(default_bin)
}

fn get_from_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return p.exists().then_some(p);
    }

    let paths_os = std::env::var_os("PATH")?;
    std::env::split_paths(&paths_os)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.exists())
}
