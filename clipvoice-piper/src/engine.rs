//! `InferenceEngine` on top of the Piper CLI.
//!
//! Models live in `voice_dir` as `<id>.onnx` + `<id>.onnx.json`. A model only
//! counts as stored when both files are present. Downloads stream into
//! `.part` files that are renamed into place once complete.

use crate::catalog::{parse_catalog, PiperVoice};
use crate::config::{PiperConfig, CATALOG_FILE};
use async_trait::async_trait;
use clipvoice_core::voice::is_canonical_voice_id;
use clipvoice_core::{EngineError, InferenceEngine, VoiceDescriptor};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

static OUTPUT_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct PiperEngine {
    config: PiperConfig,
    http: reqwest::Client,
    catalog: Option<Vec<PiperVoice>>,
    /// Voice the last `predict` ran with; cleared by `clear_session_cache`
    session_voice: Option<String>,
}

impl PiperEngine {
    pub fn new(config: PiperConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            catalog: None,
            session_voice: None,
        }
    }

    pub fn config(&self) -> &PiperConfig {
        &self.config
    }

    pub fn session_voice(&self) -> Option<&str> {
        self.session_voice.as_deref()
    }

    async fn load_catalog(&mut self) -> Result<&[PiperVoice], EngineError> {
        if self.catalog.is_none() {
            let voices = match self.fetch_remote_catalog().await {
                Ok(voices) => voices,
                Err(e) => {
                    warn!(
                        target: "piper",
                        url = %self.config.catalog_url,
                        error = %e,
                        "Remote catalog unavailable; reading local copy"
                    );
                    self.read_local_catalog().await?
                }
            };
            info!(target: "piper", voices = voices.len(), "Voice catalog loaded");
            self.catalog = Some(voices);
        }
        Ok(self.catalog.as_deref().unwrap_or_default())
    }

    async fn fetch_remote_catalog(&self) -> Result<Vec<PiperVoice>, EngineError> {
        let response = self
            .http
            .get(&self.config.catalog_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::failed(format!("catalog request failed: {}", e)))?;
        let raw = response
            .bytes()
            .await
            .map_err(|e| EngineError::failed(format!("catalog read failed: {}", e)))?;

        // keep a local copy for offline starts
        let local = self.config.voice_dir.join(CATALOG_FILE);
        if let Err(e) = tokio::fs::write(&local, &raw).await {
            debug!(target: "piper", path = %local.display(), error = %e, "Could not cache catalog");
        }
        parse_catalog(&raw).map_err(|e| EngineError::failed(format!("invalid catalog: {}", e)))
    }

    async fn read_local_catalog(&self) -> Result<Vec<PiperVoice>, EngineError> {
        let path = self.config.voice_dir.join(CATALOG_FILE);
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            EngineError::failed(format!("no voice catalog at {}: {}", path.display(), e))
        })?;
        parse_catalog(&raw).map_err(|e| EngineError::failed(format!("invalid catalog: {}", e)))
    }

    /// Stream `url` into `dest` through a `.part` file
    async fn fetch_file(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&(dyn Fn(f32) + Send + Sync)>,
    ) -> Result<(), EngineError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::failed(format!("download of {} failed: {}", url, e)))?;

        let total = response.content_length();
        let partial = part_path(dest);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut received = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EngineError::failed(format!("download of {} interrupted: {}", url, e)))?
        {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let (Some(report), Some(total)) = (progress, total.filter(|t| *t > 0)) {
                report(received as f32 / total as f32);
            }
        }
        file.flush().await?;
        drop(file);

        if let Some(total) = total {
            if received != total {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(EngineError::failed(format!(
                    "download of {} truncated: {} of {} bytes",
                    url, received, total
                )));
            }
        }
        tokio::fs::rename(&partial, dest).await?;
        debug!(target: "piper", path = %dest.display(), bytes = received, "Downloaded file");
        Ok(())
    }

    /// Model and config paths inside the voice directory
    fn model_files(&self, voice_id: &str) -> Result<(PathBuf, PathBuf), EngineError> {
        if !is_canonical_voice_id(voice_id) {
            return Err(EngineError::failed(format!(
                "'{}' is not a valid voice id",
                voice_id
            )));
        }
        Ok((
            self.config.model_path(voice_id),
            self.config.model_config_path(voice_id),
        ))
    }

    fn output_path(&self) -> PathBuf {
        let n = OUTPUT_COUNTER.fetch_add(1, Ordering::SeqCst);
        self.config
            .temp_dir
            .join(format!("clipvoice-{}-{}.wav", std::process::id(), n))
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_if_present(path: &Path) -> Result<bool, EngineError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl InferenceEngine for PiperEngine {
    async fn init(&mut self) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.config.voice_dir).await?;
        match &self.config.piper_bin {
            Some(bin) => info!(target: "piper", bin = %bin.display(), voice_dir = %self.config.voice_dir.display(), "Piper engine initialized"),
            None => warn!(target: "piper", "Piper binary not found; set PIPER_BIN. Synthesis will fail until it is installed"),
        }
        Ok(())
    }

    async fn predict(&mut self, text: &str, voice_id: &str) -> Result<Vec<u8>, EngineError> {
        let piper = self
            .config
            .piper_bin
            .clone()
            .ok_or_else(|| EngineError::failed("Piper binary not found"))?;
        let (model, _) = self.model_files(voice_id)?;
        if !model.exists() {
            return Err(EngineError::failed(format!(
                "voice model {} is not stored",
                voice_id
            )));
        }
        let out_wav = self.output_path();

        let mut cmd = Command::new(&piper);
        cmd.arg("-m").arg(&model);
        cmd.arg("-f").arg(&out_wav);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(target: "piper", voice = %voice_id, chars = text.chars().count(), "Running piper");
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;
        self.session_voice = Some(voice_id.to_string());

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&out_wav).await;
            return Err(EngineError::failed(format!(
                "Piper failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let bytes = tokio::fs::read(&out_wav).await?;
        let _ = tokio::fs::remove_file(&out_wav).await;
        Ok(bytes)
    }

    async fn voices(&mut self) -> Result<Vec<VoiceDescriptor>, EngineError> {
        let catalog = self.load_catalog().await?;
        Ok(catalog.iter().filter_map(PiperVoice::descriptor).collect())
    }

    async fn stored(&mut self) -> Result<Vec<String>, EngineError> {
        let mut entries = match tokio::fs::read_dir(&self.config.voice_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".onnx")) else {
                continue;
            };
            if self.config.model_config_path(id).exists() {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn download(
        &mut self,
        voice_id: &str,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<(), EngineError> {
        let (model_path, config_path) = self.model_files(voice_id)?;
        let entry = self
            .load_catalog()
            .await?
            .iter()
            .find(|v| v.key == voice_id)
            .cloned()
            .ok_or_else(|| EngineError::failed(format!("voice {} is not in the catalog", voice_id)))?;
        tokio::fs::create_dir_all(&self.config.voice_dir).await?;

        info!(target: "piper", voice = %voice_id, "Downloading voice model");
        progress(0.0);
        let config_url = format!("{}{}", self.config.model_base_url, entry.config_file());
        self.fetch_file(&config_url, &config_path, None).await?;
        let model_url = format!("{}{}", self.config.model_base_url, entry.model_file());
        if let Err(e) = self
            .fetch_file(&model_url, &model_path, Some(progress))
            .await
        {
            let _ = remove_if_present(&config_path).await;
            return Err(e);
        }
        progress(1.0);
        info!(target: "piper", voice = %voice_id, "Voice model downloaded");
        Ok(())
    }

    async fn remove(&mut self, voice_id: &str) -> Result<(), EngineError> {
        let (model_path, config_path) = self.model_files(voice_id)?;
        let model = remove_if_present(&model_path).await?;
        let config = remove_if_present(&config_path).await?;
        if self.session_voice.as_deref() == Some(voice_id) {
            self.session_voice = None;
        }
        debug!(target: "piper", voice = %voice_id, model, config, "Removed voice model");
        Ok(())
    }

    async fn clear_session_cache(&mut self) -> Result<(), EngineError> {
        self.session_voice = None;
        Ok(())
    }
}
