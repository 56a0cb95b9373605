//! Synthesis orchestrator.
//!
//! Drives one request through
//! `Resolving -> Downloading -> Verifying -> Synthesizing -> Done`, detouring
//! through `Recovering` for corrupted models and phonemizer failures. Chunks
//! are synthesized strictly one at a time; cancellation is checked between
//! chunks and between phases.

pub mod state;

pub use state::{Phase, RecoveryBudget, RecoveryCause, Transition};

use crate::audio::{merge, WavFormat};
use crate::cache::{Availability, ModelCacheManager};
use crate::config::{TextConfig, TtsConfig};
use crate::text::{plan_chunks, sanitize, sanitize_strict, TextChunk};
use crate::transport::{TransportEnvelope, TransportSelector};
use crate::voice::{VoiceRef, VoiceResolver, VoiceSelection};
use crate::{Result, TtsError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

fn default_language() -> String {
    "auto".to_string()
}

/// One inbound synthesis request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub text: String,
    /// Language code or `auto`
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub voice: Option<VoiceRef>,
    #[serde(default)]
    pub unlimited_storage_allowed: bool,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: default_language(),
            voice: None,
            unlimited_storage_allowed: false,
        }
    }
}

/// Progress notifications for a running request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SynthesisEvent {
    #[serde(rename_all = "camelCase")]
    ResolvedVoice {
        voice_id: String,
        language: String,
        is_fallback: bool,
    },
    #[serde(rename_all = "camelCase")]
    Download { voice_id: String, percent: u8 },
    Chunk { index: usize, total: usize },
    Recovering { reason: String },
    Completed { size: usize },
}

/// Cooperative cancellation shared between the caller and a running request
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TtsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Delivered audio plus what was actually used to produce it
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub envelope: TransportEnvelope,
    pub format: WavFormat,
    pub duration_ms: u64,
    pub voice_id: String,
    pub language: String,
    pub chunks: usize,
    pub warnings: Vec<String>,
}

type EventSender = Option<mpsc::UnboundedSender<SynthesisEvent>>;

fn emit(events: &EventSender, event: SynthesisEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Mutable data of one run
struct Run {
    language: String,
    chunks: Vec<TextChunk>,
    voice_id: String,
    selection: Option<VoiceSelection>,
    audio: Vec<Vec<u8>>,
    budget: RecoveryBudget,
    /// Chunks already retried with strict sanitization
    strict_retried: HashSet<usize>,
    warnings: Vec<String>,
}

impl Run {
    fn next_chunk(&self) -> usize {
        self.audio.len()
    }
}

#[derive(Clone)]
pub struct SynthesisOrchestrator {
    text: TextConfig,
    resolver: VoiceResolver,
    cache: ModelCacheManager,
    transport: TransportSelector,
}

impl SynthesisOrchestrator {
    pub fn new(config: &TtsConfig, cache: ModelCacheManager, transport: TransportSelector) -> Self {
        Self {
            text: config.text.clone(),
            resolver: VoiceResolver::new(&config.voice),
            cache,
            transport,
        }
    }

    pub fn cache(&self) -> &ModelCacheManager {
        &self.cache
    }

    pub fn transport(&self) -> &TransportSelector {
        &self.transport
    }

    pub fn resolver(&self) -> &VoiceResolver {
        &self.resolver
    }

    #[tracing::instrument(
        name = "synthesize",
        skip_all,
        fields(chars = request.text.chars().count(), language = %request.language)
    )]
    pub async fn synthesize(
        &self,
        request: SynthesisRequest,
        events: EventSender,
        cancel: CancellationFlag,
    ) -> Result<SynthesisOutcome> {
        let language = self.resolver.resolve_language(&request.language, &request.text);
        let sanitized = sanitize(&request.text, &language, &self.text)?;
        let chunks = plan_chunks(&sanitized, &language, &self.text);
        debug!(target: "orchestrator", language = %language, chunks = chunks.len(), "Planned synthesis");

        let mut run = Run {
            language,
            chunks,
            voice_id: String::new(),
            selection: None,
            audio: Vec::new(),
            budget: RecoveryBudget::new(self.cache.config().recovery_attempts),
            strict_retried: HashSet::new(),
            warnings: Vec::new(),
        };

        let mut phase = Phase::Resolving;
        loop {
            cancel.check()?;
            debug!(target: "orchestrator", phase = %phase, voice = %run.voice_id, "Entering phase");
            let step = match phase {
                Phase::Resolving => self.resolve_voice(&mut run, &request, &events).await,
                Phase::Downloading => self.download(&run, &events).await,
                Phase::Verifying => self.verify(&run).await,
                Phase::Synthesizing => self.synthesize_chunks(&mut run, &events, &cancel).await,
                Phase::Recovering(cause) => self.recover(&mut run, cause, &events).await,
                Phase::Done => break,
            };
            phase = match step {
                Ok(next) => next,
                Err(e) => self.on_failure(&mut run, e)?,
            };
        }

        self.finish(run, request.unlimited_storage_allowed, &events)
            .await
    }

    async fn resolve_voice(
        &self,
        run: &mut Run,
        request: &SynthesisRequest,
        events: &EventSender,
    ) -> Result<Phase> {
        let selection = self
            .resolver
            .resolve(request.voice.as_ref(), &run.language, &self.cache)
            .await;
        info!(
            target: "orchestrator",
            voice = %selection.voice_id,
            language = %selection.source_language,
            is_fallback = selection.is_fallback,
            "Voice resolved"
        );
        emit(
            events,
            SynthesisEvent::ResolvedVoice {
                voice_id: selection.voice_id.clone(),
                language: selection.source_language.clone(),
                is_fallback: selection.is_fallback,
            },
        );
        run.voice_id = selection.voice_id.clone();
        run.warnings.extend(selection.warnings.iter().cloned());
        run.selection = Some(selection);
        Ok(Phase::Downloading)
    }

    async fn download(&self, run: &Run, events: &EventSender) -> Result<Phase> {
        let voice_id = run.voice_id.clone();
        let progress = |percent: u8| {
            emit(
                events,
                SynthesisEvent::Download {
                    voice_id: voice_id.clone(),
                    percent,
                },
            )
        };
        match self.cache.ensure_available(&run.voice_id, &progress).await? {
            Availability::AlreadyStored => Ok(Phase::Synthesizing),
            Availability::Downloaded => Ok(Phase::Verifying),
        }
    }

    async fn verify(&self, run: &Run) -> Result<Phase> {
        if self.cache.verify_integrity(&run.voice_id).await? {
            Ok(Phase::Synthesizing)
        } else {
            Err(TtsError::ModelCorruption {
                voice_id: run.voice_id.clone(),
                message: "smoke test failed after download".to_string(),
            })
        }
    }

    async fn synthesize_chunks(
        &self,
        run: &mut Run,
        events: &EventSender,
        cancel: &CancellationFlag,
    ) -> Result<Phase> {
        let total = run.chunks.len();
        while run.next_chunk() < total {
            cancel.check()?;
            let index = run.next_chunk();
            emit(events, SynthesisEvent::Chunk { index, total });

            let chunk = &run.chunks[index];
            debug!(target: "orchestrator", index, total, chars = chunk.char_len(), "Synthesizing chunk");
            let wav = self.cache.worker().predict(&chunk.text, &run.voice_id).await?;
            run.audio.push(wav);

            // let progress consumers and cancellation interleave
            tokio::task::yield_now().await;
        }
        Ok(Phase::Done)
    }

    async fn recover(
        &self,
        run: &mut Run,
        cause: RecoveryCause,
        events: &EventSender,
    ) -> Result<Phase> {
        emit(
            events,
            SynthesisEvent::Recovering {
                reason: cause.to_string(),
            },
        );
        match cause {
            RecoveryCause::Corruption => {
                run.budget.record_retry();
                warn!(
                    target: "orchestrator",
                    voice = %run.voice_id,
                    attempt = run.budget.retries(),
                    "Recovering from model corruption"
                );
                let voice_id = run.voice_id.clone();
                let progress = |percent: u8| {
                    emit(
                        events,
                        SynthesisEvent::Download {
                            voice_id: voice_id.clone(),
                            percent,
                        },
                    )
                };
                self.cache
                    .evict_and_redownload(&run.voice_id, &progress)
                    .await?;
                Ok(Phase::Verifying)
            }
            RecoveryCause::Phonemization => {
                let index = run.next_chunk();
                run.strict_retried.insert(index);
                let chunk = &mut run.chunks[index];
                let strict = sanitize_strict(&chunk.text).map_err(|_| TtsError::Phonemization {
                    voice_id: run.voice_id.clone(),
                    message: format!("chunk {} has no speakable ASCII text", index),
                })?;
                warn!(
                    target: "orchestrator",
                    voice = %run.voice_id,
                    index,
                    "Retrying chunk with strict sanitization"
                );
                chunk.text = strict;
                run.warnings
                    .push(format!("Chunk {} was simplified to ASCII for synthesis", index));
                Ok(Phase::Synthesizing)
            }
        }
    }

    /// Pick the next phase after `error`, or give up
    fn on_failure(&self, run: &mut Run, error: TtsError) -> Result<Phase> {
        let strict_available = !run.strict_retried.contains(&run.next_chunk());
        match run.budget.transition_for(&error, strict_available) {
            Transition::Recover(cause) => {
                debug!(target: "orchestrator", cause = %cause, error = %error, "Transient failure; recovering");
                Ok(Phase::Recovering(cause))
            }
            Transition::Fallback => {
                let Some(fallback) = self.resolver.fallback_for(&run.language, &run.voice_id) else {
                    warn!(target: "orchestrator", voice = %run.voice_id, error = %error, "No fallback voice available");
                    return Err(error);
                };
                warn!(
                    target: "orchestrator",
                    from = %run.voice_id,
                    to = %fallback,
                    error = %error,
                    "Switching to fallback voice"
                );
                run.warnings.push(format!(
                    "Voice {} failed ({}); used fallback voice {}",
                    run.voice_id,
                    error.code(),
                    fallback
                ));
                run.budget.record_fallback();
                run.voice_id = fallback;
                run.audio.clear();
                Ok(Phase::Downloading)
            }
            Transition::Fail => Err(error),
        }
    }

    async fn finish(
        &self,
        run: Run,
        unlimited_storage_allowed: bool,
        events: &EventSender,
    ) -> Result<SynthesisOutcome> {
        let merged = merge(&run.audio)?;
        let mut warnings = run.warnings;
        if merged.skipped > 0 {
            warnings.push(format!(
                "{} synthesized chunk(s) were not valid audio and were skipped",
                merged.skipped
            ));
        }

        let audio = merged.audio;
        let format = WavFormat {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            bits_per_sample: audio.bits_per_sample,
            ..WavFormat::default()
        };
        let duration_ms = audio.duration_ms();
        let envelope = self
            .transport
            .deliver(audio.bytes, unlimited_storage_allowed)
            .await?;

        info!(
            target: "orchestrator",
            voice = %run.voice_id,
            chunks = run.chunks.len(),
            size = envelope.size,
            method = envelope.mode.as_str(),
            duration_ms,
            "Synthesis complete"
        );
        emit(events, SynthesisEvent::Completed { size: envelope.size });

        Ok(SynthesisOutcome {
            envelope,
            format,
            duration_ms,
            voice_id: run.voice_id,
            language: run
                .selection
                .map(|s| s.source_language)
                .unwrap_or(run.language),
            chunks: run.chunks.len(),
            warnings,
        })
    }
}
