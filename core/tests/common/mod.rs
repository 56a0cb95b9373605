//! Scripted inference engine and component wiring shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use clipvoice_core::config::{CacheConfig, TtsConfig, WorkerConfig};
use clipvoice_core::transport::{BlobStore, InMemoryKvStore, KeyValueStore};
use clipvoice_core::{
    EngineError, EngineFactory, InferenceEngine, ModelCacheManager, SynthesisOrchestrator,
    TransportSelector, TtsHost, VoiceDescriptor, WorkerCoordinator,
};
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 22_050;

/// Behaviour of the fake engine, shared with the test body
#[derive(Default)]
pub struct FakeScript {
    pub catalog: Vec<VoiceDescriptor>,
    pub stored: BTreeSet<String>,
    /// `list-stored` calls a finished download stays invisible for
    pub stored_lag: u32,
    pub never_store: bool,
    pub download_fails: bool,
    pub supports_remove: bool,
    /// Remaining corrupted predicts per voice
    pub corrupt: HashMap<String, u32>,
    /// Predict fails like a phonemizer index error on non-ASCII text
    pub reject_non_ascii: bool,
    pub predict_delay: Duration,
    /// Engine keeps the first voice it loads until the session cache is cleared
    pub session_cache: bool,
    /// Number of upcoming `clear-session-cache` calls that take `clear_delay`
    pub slow_clears: u32,
    pub clear_delay: Duration,
    /// Predicts served with a different voice than requested
    pub stale: Vec<String>,
    pub fail_init: bool,
    pub boots: u32,
    pub calls: Vec<String>,
    lagging: Vec<(String, u32)>,
}

impl FakeScript {
    pub fn predicts(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|c| c.starts_with("predict:"))
            .cloned()
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub type Script = Arc<Mutex<FakeScript>>;

pub fn descriptor(id: &str) -> VoiceDescriptor {
    VoiceDescriptor::from_id(id, id).unwrap()
}

pub fn script(catalog: &[&str], stored: &[&str]) -> Script {
    Arc::new(Mutex::new(FakeScript {
        catalog: catalog.iter().map(|id| descriptor(id)).collect(),
        stored: stored.iter().map(|id| id.to_string()).collect(),
        ..FakeScript::default()
    }))
}

/// Mono 16-bit WAV with one sample per character of `text`
pub fn wav_for(text: &str) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for (i, _) in text.chars().enumerate() {
            writer.write_sample((i as i16) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub struct FakeEngine {
    script: Script,
    loaded: Option<String>,
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn init(&mut self) -> Result<(), EngineError> {
        let mut s = self.script.lock().unwrap();
        s.calls.push("init".into());
        if s.fail_init {
            return Err(EngineError::failed("wasm instantiate failed"));
        }
        Ok(())
    }

    async fn predict(&mut self, text: &str, voice_id: &str) -> Result<Vec<u8>, EngineError> {
        let delay = {
            let mut s = self.script.lock().unwrap();
            s.calls.push(format!("predict:{}:{}", voice_id, text));
            if !s.stored.contains(voice_id) {
                return Err(EngineError::failed(format!("voice {} not stored", voice_id)));
            }
            if let Some(remaining) = s.corrupt.get_mut(voice_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError::failed("RuntimeError: Aborted(). Build with -sASSERTIONS"));
                }
            }
            if s.reject_non_ascii && !text.is_ascii() {
                return Err(EngineError::failed("index 212 is out of range for phoneme table"));
            }
            if s.session_cache {
                match self.loaded.as_deref() {
                    Some(used) if used != voice_id => {
                        s.stale.push(format!("requested={} used={}", voice_id, used));
                    }
                    Some(_) => {}
                    None => self.loaded = Some(voice_id.to_string()),
                }
            }
            s.predict_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(wav_for(text))
    }

    async fn voices(&mut self) -> Result<Vec<VoiceDescriptor>, EngineError> {
        let mut s = self.script.lock().unwrap();
        s.calls.push("list-voices".into());
        Ok(s.catalog.clone())
    }

    async fn stored(&mut self) -> Result<Vec<String>, EngineError> {
        let mut s = self.script.lock().unwrap();
        s.calls.push("list-stored".into());
        let mut landed = Vec::new();
        for (voice, remaining) in s.lagging.iter_mut() {
            if *remaining == 0 {
                landed.push(voice.clone());
            } else {
                *remaining -= 1;
            }
        }
        s.lagging.retain(|(voice, _)| !landed.contains(voice));
        s.stored.extend(landed);
        Ok(s.stored.iter().cloned().collect())
    }

    async fn download(
        &mut self,
        voice_id: &str,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<(), EngineError> {
        {
            let mut s = self.script.lock().unwrap();
            s.calls.push(format!("download:{}", voice_id));
            if s.download_fails {
                return Err(EngineError::failed("network unreachable"));
            }
        }
        for step in 1..=4 {
            progress(step as f32 / 4.0);
        }
        let mut s = self.script.lock().unwrap();
        if s.never_store {
            return Ok(());
        }
        if s.stored_lag == 0 {
            s.stored.insert(voice_id.to_string());
        } else {
            let lag = s.stored_lag;
            s.lagging.push((voice_id.to_string(), lag));
        }
        Ok(())
    }

    async fn remove(&mut self, voice_id: &str) -> Result<(), EngineError> {
        let mut s = self.script.lock().unwrap();
        s.calls.push(format!("remove:{}", voice_id));
        if !s.supports_remove {
            return Err(EngineError::Unsupported("remove".into()));
        }
        s.stored.remove(voice_id);
        Ok(())
    }

    async fn clear_session_cache(&mut self) -> Result<(), EngineError> {
        let delay = {
            let mut s = self.script.lock().unwrap();
            s.calls.push("clear-session-cache".into());
            if s.slow_clears > 0 {
                s.slow_clears -= 1;
                s.clear_delay
            } else {
                Duration::ZERO
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.loaded = None;
        Ok(())
    }
}

pub fn factory(script: &Script) -> Arc<dyn EngineFactory> {
    let script = Arc::clone(script);
    Arc::new(move || -> Result<Box<dyn InferenceEngine>, EngineError> {
        script.lock().unwrap().boots += 1;
        Ok(Box::new(FakeEngine {
            script: Arc::clone(&script),
            loaded: None,
        }))
    })
}

/// Configuration with timings small enough for tests
pub fn test_config() -> TtsConfig {
    let mut config = TtsConfig::default();
    config.voice.default_language = "en".into();
    config.text.max_chunk_chars = 200;
    config.text.stream_threshold_chars = 2_000;
    config.text.ascii_only_languages = vec!["en".into()];
    config.worker = WorkerConfig {
        boot_timeout_ms: 2_000,
        inference_timeout_ms: 2_000,
        download_timeout_ms: 2_000,
        cache_clear_timeout_ms: 500,
        control_timeout_ms: 1_000,
        idle_timeout_ms: 60_000,
        init_attempts: 2,
    };
    config.cache = CacheConfig {
        verify_attempts: 3,
        verify_delay_ms: 5,
        remove_settle_ms: 1,
        recovery_attempts: 2,
        smoke_test_text: "Test.".into(),
    };
    config.transport.inline_threshold_bytes = 5 * 1024 * 1024;
    config.transport.message_ceiling_bytes = 64 * 1024 * 1024;
    config.transport.object_store_threshold_bytes = 50 * 1024 * 1024;
    config.transport.max_payload_bytes = 100 * 1024 * 1024;
    config.transport.max_payload_unlimited_bytes = 500 * 1024 * 1024;
    config
}

pub struct Harness {
    pub script: Script,
    pub worker: WorkerCoordinator,
    pub cache: ModelCacheManager,
    pub orchestrator: SynthesisOrchestrator,
    pub host: TtsHost,
}

pub fn harness(script: Script) -> Harness {
    harness_with(script, test_config(), InMemoryKvStore::new(), None)
}

pub fn harness_with(
    script: Script,
    config: TtsConfig,
    kv: Arc<dyn KeyValueStore>,
    blobs: Option<Arc<dyn BlobStore>>,
) -> Harness {
    let worker = WorkerCoordinator::new(factory(&script), config.worker.clone());
    let cache = ModelCacheManager::new(worker.clone(), config.cache.clone());
    let transport = TransportSelector::new(config.transport.clone(), kv, blobs);
    let orchestrator = SynthesisOrchestrator::new(&config, cache.clone(), transport);
    let host = TtsHost::new(orchestrator.clone());
    Harness {
        script,
        worker,
        cache,
        orchestrator,
        host,
    }
}
