//! Engine configuration.
//!
//! Every section starts from env-driven defaults; `TtsConfig::load()` overlays an
//! optional TOML file (path via CLIPVOICE_CONFIG or ./clipvoice.toml).
//!
//! Env overrides:
//! - TTS_MAX_CHUNK_CHARS, TTS_STREAM_THRESHOLD_CHARS
//! - TTS_DEFAULT_LANGUAGE
//! - TTS_BOOT_TIMEOUT_MS, TTS_INFERENCE_TIMEOUT_MS, TTS_DOWNLOAD_TIMEOUT_MS,
//!   TTS_CACHE_CLEAR_TIMEOUT_MS, TTS_CONTROL_TIMEOUT_MS, TTS_IDLE_TIMEOUT_MS
//! - TTS_VERIFY_ATTEMPTS, TTS_VERIFY_DELAY_MS, TTS_RECOVERY_ATTEMPTS
//! - TTS_INLINE_THRESHOLD_BYTES, TTS_MESSAGE_CEILING_BYTES,
//!   TTS_OBJECT_STORE_THRESHOLD_BYTES, TTS_MAX_PAYLOAD_BYTES,
//!   TTS_MAX_PAYLOAD_UNLIMITED_BYTES

use crate::{Result, TtsError};
use std::fs;
use std::path::Path;
use std::time::Duration;

const MB: usize = 1024 * 1024;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<T>().ok())
}

/// Top-level configuration shared by all engine components
#[derive(Clone, Debug, Default)]
pub struct TtsConfig {
    pub text: TextConfig,
    pub voice: VoiceConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub transport: TransportConfig,
}

/// Sanitizer and segmenter limits
#[derive(Clone, Debug)]
pub struct TextConfig {
    /// Upper bound (in chars) for a single synthesis chunk
    pub max_chunk_chars: usize,
    /// Texts longer than this are always segmented
    pub stream_threshold_chars: usize,
    /// Languages whose phonemizer only accepts printable ASCII
    pub ascii_only_languages: Vec<String>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: env_parse("TTS_MAX_CHUNK_CHARS").unwrap_or(200),
            stream_threshold_chars: env_parse("TTS_STREAM_THRESHOLD_CHARS").unwrap_or(2_000),
            ascii_only_languages: vec!["en".to_string()],
        }
    }
}

#[derive(Clone, Debug)]
pub struct VoiceConfig {
    /// Language used when detection is inconclusive or a language has no voice
    pub default_language: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            default_language: std::env::var("TTS_DEFAULT_LANGUAGE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "en".to_string()),
        }
    }
}

/// Inference worker lifecycle and per-call-kind timeouts
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub boot_timeout_ms: u64,
    pub inference_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub cache_clear_timeout_ms: u64,
    /// Catalog, stored-set and remove calls
    pub control_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub init_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            boot_timeout_ms: env_parse("TTS_BOOT_TIMEOUT_MS").unwrap_or(30_000),
            inference_timeout_ms: env_parse("TTS_INFERENCE_TIMEOUT_MS").unwrap_or(60_000),
            download_timeout_ms: env_parse("TTS_DOWNLOAD_TIMEOUT_MS").unwrap_or(300_000),
            cache_clear_timeout_ms: env_parse("TTS_CACHE_CLEAR_TIMEOUT_MS").unwrap_or(5_000),
            control_timeout_ms: env_parse("TTS_CONTROL_TIMEOUT_MS").unwrap_or(30_000),
            idle_timeout_ms: env_parse("TTS_IDLE_TIMEOUT_MS").unwrap_or(300_000),
            init_attempts: 2,
        }
    }
}

impl WorkerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Model cache verification and recovery budget
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub verify_attempts: u32,
    pub verify_delay_ms: u64,
    /// Pause between removing a corrupted model and downloading it again
    pub remove_settle_ms: u64,
    pub recovery_attempts: u32,
    pub smoke_test_text: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            verify_attempts: env_parse("TTS_VERIFY_ATTEMPTS").unwrap_or(5),
            verify_delay_ms: env_parse("TTS_VERIFY_DELAY_MS").unwrap_or(500),
            remove_settle_ms: 1_000,
            recovery_attempts: env_parse("TTS_RECOVERY_ATTEMPTS").unwrap_or(2),
            smoke_test_text: "Test.".to_string(),
        }
    }
}

/// Size thresholds for choosing how audio leaves the engine
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Payloads below this are returned inline
    pub inline_threshold_bytes: usize,
    /// Hard ceiling of one host message after serialization
    pub message_ceiling_bytes: usize,
    /// Payloads at or above this prefer the binary object store
    pub object_store_threshold_bytes: usize,
    pub max_payload_bytes: usize,
    pub max_payload_unlimited_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: env_parse("TTS_INLINE_THRESHOLD_BYTES").unwrap_or(5 * MB),
            message_ceiling_bytes: env_parse("TTS_MESSAGE_CEILING_BYTES").unwrap_or(64 * MB),
            object_store_threshold_bytes: env_parse("TTS_OBJECT_STORE_THRESHOLD_BYTES")
                .unwrap_or(50 * MB),
            max_payload_bytes: env_parse("TTS_MAX_PAYLOAD_BYTES").unwrap_or(100 * MB),
            max_payload_unlimited_bytes: env_parse("TTS_MAX_PAYLOAD_UNLIMITED_BYTES")
                .unwrap_or(500 * MB),
        }
    }
}

impl TtsConfig {
    /// Load configuration from a TOML file (path via CLIPVOICE_CONFIG or ./clipvoice.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("CLIPVOICE_CONFIG").unwrap_or_else(|_| "clipvoice.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "config", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<TtsToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    /// Overlay a TOML document onto the defaults, failing on malformed input
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let t = toml::from_str::<TtsToml>(s).map_err(|e| TtsError::Config(e.to_string()))?;
        Ok(t.overlay(Self::default()))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TtsToml {
    pub text: Option<TextToml>,
    pub voice: Option<VoiceToml>,
    pub worker: Option<WorkerToml>,
    pub cache: Option<CacheToml>,
    pub transport: Option<TransportToml>,
}

impl TtsToml {
    fn overlay(self, mut base: TtsConfig) -> TtsConfig {
        if let Some(t) = self.text {
            t.apply(&mut base.text);
        }
        if let Some(v) = self.voice {
            v.apply(&mut base.voice);
        }
        if let Some(w) = self.worker {
            w.apply(&mut base.worker);
        }
        if let Some(c) = self.cache {
            c.apply(&mut base.cache);
        }
        if let Some(t) = self.transport {
            t.apply(&mut base.transport);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TextToml {
    pub max_chunk_chars: Option<usize>,
    pub stream_threshold_chars: Option<usize>,
    pub ascii_only_languages: Option<Vec<String>>,
}
impl TextToml {
    fn apply(self, t: &mut TextConfig) {
        if let Some(v) = self.max_chunk_chars {
            // A zero limit would make every character its own chunk
            t.max_chunk_chars = v.max(16);
        }
        if let Some(v) = self.stream_threshold_chars {
            t.stream_threshold_chars = v;
        }
        if let Some(mut v) = self.ascii_only_languages {
            t.ascii_only_languages = v
                .drain(..)
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect();
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct VoiceToml {
    pub default_language: Option<String>,
}
impl VoiceToml {
    fn apply(self, v: &mut VoiceConfig) {
        if let Some(x) = self.default_language.filter(|s| !s.is_empty()) {
            v.default_language = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct WorkerToml {
    pub boot_timeout_ms: Option<u64>,
    pub inference_timeout_ms: Option<u64>,
    pub download_timeout_ms: Option<u64>,
    pub cache_clear_timeout_ms: Option<u64>,
    pub control_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub init_attempts: Option<u32>,
}
impl WorkerToml {
    fn apply(self, w: &mut WorkerConfig) {
        if let Some(x) = self.boot_timeout_ms {
            w.boot_timeout_ms = x;
        }
        if let Some(x) = self.inference_timeout_ms {
            w.inference_timeout_ms = x;
        }
        if let Some(x) = self.download_timeout_ms {
            w.download_timeout_ms = x;
        }
        if let Some(x) = self.cache_clear_timeout_ms {
            w.cache_clear_timeout_ms = x;
        }
        if let Some(x) = self.control_timeout_ms {
            w.control_timeout_ms = x;
        }
        if let Some(x) = self.idle_timeout_ms {
            w.idle_timeout_ms = x;
        }
        if let Some(x) = self.init_attempts {
            w.init_attempts = x.max(1);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct CacheToml {
    pub verify_attempts: Option<u32>,
    pub verify_delay_ms: Option<u64>,
    pub remove_settle_ms: Option<u64>,
    pub recovery_attempts: Option<u32>,
    pub smoke_test_text: Option<String>,
}
impl CacheToml {
    fn apply(self, c: &mut CacheConfig) {
        if let Some(x) = self.verify_attempts {
            c.verify_attempts = x.max(1);
        }
        if let Some(x) = self.verify_delay_ms {
            c.verify_delay_ms = x;
        }
        if let Some(x) = self.remove_settle_ms {
            c.remove_settle_ms = x;
        }
        if let Some(x) = self.recovery_attempts {
            c.recovery_attempts = x;
        }
        if let Some(x) = self.smoke_test_text.filter(|s| !s.trim().is_empty()) {
            c.smoke_test_text = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TransportToml {
    pub inline_threshold_bytes: Option<usize>,
    pub message_ceiling_bytes: Option<usize>,
    pub object_store_threshold_bytes: Option<usize>,
    pub max_payload_bytes: Option<usize>,
    pub max_payload_unlimited_bytes: Option<usize>,
}
impl TransportToml {
    fn apply(self, t: &mut TransportConfig) {
        if let Some(x) = self.inline_threshold_bytes {
            t.inline_threshold_bytes = x;
        }
        if let Some(x) = self.message_ceiling_bytes {
            t.message_ceiling_bytes = x;
        }
        if let Some(x) = self.object_store_threshold_bytes {
            t.object_store_threshold_bytes = x;
        }
        if let Some(x) = self.max_payload_bytes {
            t.max_payload_bytes = x;
        }
        if let Some(x) = self.max_payload_unlimited_bytes {
            t.max_payload_unlimited_bytes = x;
        }
    }
}
