//! Inference worker coordinator.
//!
//! Owns the single worker thread shared by all requests and exposes every
//! engine primitive as an RPC with a correlation id and a per-kind timeout.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Ready -> Terminated(reason)`.
//! A terminated worker is booted again by the next call. All lifecycle data
//! lives in one [`CoordinatorState`] behind an async mutex; boot happens while
//! holding it, so concurrent callers collapse onto one initialization.

use super::host::spawn_worker;
use super::protocol::{
    CallId, ResponseBody, WorkerCommand, WorkerFault, WorkerMessage, WorkerReply, WorkerRequest,
};
use crate::config::WorkerConfig;
use crate::engine::{EngineFactory, VoiceDescriptor};
use crate::{Result, TtsError};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Why a worker session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    IdleTimeout,
    Explicit,
    Fatal(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::IdleTimeout => f.write_str("idle-timeout"),
            TerminationReason::Explicit => f.write_str("explicit"),
            TerminationReason::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    Terminated(TerminationReason),
}

/// Result of a `remove` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// Engine has no remove primitive
    Unsupported,
}

struct WorkerSession {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    generation: u64,
}

/// Mutable lifecycle data for the worker
pub struct CoordinatorState {
    lifecycle: Lifecycle,
    session: Option<WorkerSession>,
    /// Voice of the most recent `predict`
    last_voice: Option<String>,
    last_activity: Instant,
    generation: u64,
    /// Catalog cached for the current session
    voices: Option<Vec<VoiceDescriptor>>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            session: None,
            last_voice: None,
            last_activity: Instant::now(),
            generation: 0,
            voices: None,
        }
    }
}

type ReplySender = oneshot::Sender<std::result::Result<WorkerReply, WorkerFault>>;

struct PendingCall {
    generation: u64,
    reply: ReplySender,
    progress: Option<mpsc::UnboundedSender<f32>>,
}

struct Inner {
    factory: Arc<dyn EngineFactory>,
    config: WorkerConfig,
    next_id: AtomicU64,
    pending: DashMap<CallId, PendingCall>,
    state: Mutex<CoordinatorState>,
    /// Serializes voice switch and predict dispatch
    predict_lock: Mutex<()>,
}

/// Single entry point to the inference engine
#[derive(Clone)]
pub struct WorkerCoordinator {
    inner: Arc<Inner>,
}

impl WorkerCoordinator {
    pub fn new(factory: Arc<dyn EngineFactory>, config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                config,
                next_id: AtomicU64::new(1),
                pending: DashMap::new(),
                state: Mutex::new(CoordinatorState::new()),
                predict_lock: Mutex::new(()),
            }),
        }
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().await.lifecycle.clone()
    }

    pub async fn last_voice(&self) -> Option<String> {
        self.inner.state.lock().await.last_voice.clone()
    }

    /// Number of worker sessions booted so far
    pub async fn generation(&self) -> u64 {
        self.inner.state.lock().await.generation
    }

    /// Boot the worker if needed; concurrent callers share one boot
    pub async fn ensure_ready(&self) -> Result<()> {
        self.session_sender().await.map(|_| ())
    }

    /// Synthesize one chunk, clearing the engine session first when the voice changes.
    ///
    /// The switch check, the clear and the dispatch run under one lock so
    /// concurrent requests cannot slip a predict between a clear and its voice.
    pub async fn predict(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let _serial = self.inner.predict_lock.lock().await;

        // a fresh boot resets the tracked voice, so boot before comparing
        self.ensure_ready().await?;
        let switched = {
            let state = self.inner.state.lock().await;
            state
                .last_voice
                .as_deref()
                .is_some_and(|previous| previous != voice_id)
        };
        if switched {
            debug!(target: "worker", voice = %voice_id, "Voice changed; clearing engine session");
            if let Err(e) = self.clear_session_cache().await {
                warn!(
                    target: "worker",
                    voice = %voice_id,
                    error = %e,
                    "Session cache clear not acknowledged; continuing"
                );
            }
        }

        // a failed clear may have replaced the worker; track the voice on the
        // session that serves this predict
        let (sender, generation) = self.session_sender().await?;
        {
            let mut state = self.inner.state.lock().await;
            if state.generation == generation && state.session.is_some() {
                state.last_voice = Some(voice_id.to_string());
            }
        }

        let command = WorkerCommand::Predict {
            text: text.to_string(),
            voice_id: voice_id.to_string(),
        };
        self.call_on(sender, generation, command, None)
            .await?
            .map_err(|fault| fault.into_error("predict", Some(voice_id)))?
            .into_audio()
    }

    /// Engine catalog, cached per worker session
    pub async fn voices(&self) -> Result<Vec<VoiceDescriptor>> {
        if let Some(cached) = self.inner.state.lock().await.voices.clone() {
            return Ok(cached);
        }
        let voices = self.call(WorkerCommand::ListVoices, None).await?.into_voices()?;
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            state.voices = Some(voices.clone());
        }
        Ok(voices)
    }

    pub async fn stored(&self) -> Result<Vec<String>> {
        self.call(WorkerCommand::ListStored, None).await?.into_stored()
    }

    /// Download a model; `on_progress` receives fractions in `0.0..=1.0`
    pub async fn download(
        &self,
        voice_id: &str,
        on_progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<()> {
        let command = WorkerCommand::Download {
            voice_id: voice_id.to_string(),
        };
        self.call(command, Some(on_progress)).await?.into_ack()
    }

    pub async fn remove(&self, voice_id: &str) -> Result<RemoveOutcome> {
        let command = WorkerCommand::Remove {
            voice_id: voice_id.to_string(),
        };
        match self.call_raw(command, None).await? {
            Ok(reply) => reply.into_ack().map(|_| RemoveOutcome::Removed),
            Err(fault) if fault.unsupported => {
                debug!(target: "worker", voice = %voice_id, "Engine has no remove primitive");
                Ok(RemoveOutcome::Unsupported)
            }
            Err(fault) => Err(fault.into_error("remove", Some(voice_id))),
        }
    }

    pub async fn clear_session_cache(&self) -> Result<()> {
        self.call(WorkerCommand::ClearSessionCache, None)
            .await?
            .into_ack()
    }

    /// Stop the worker; the next call boots a new one
    pub async fn terminate(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.teardown(&mut state, TerminationReason::Explicit);
    }

    async fn call(
        &self,
        command: WorkerCommand,
        on_progress: Option<&(dyn Fn(f32) + Send + Sync)>,
    ) -> Result<WorkerReply> {
        let kind = command.kind();
        let voice = command.voice_id().map(str::to_string);
        self.call_raw(command, on_progress)
            .await?
            .map_err(|fault| fault.into_error(kind, voice.as_deref()))
    }

    /// Issue one RPC; the outer error covers transport and timeouts, the inner
    /// one is the engine's own fault
    async fn call_raw(
        &self,
        command: WorkerCommand,
        on_progress: Option<&(dyn Fn(f32) + Send + Sync)>,
    ) -> Result<std::result::Result<WorkerReply, WorkerFault>> {
        let (sender, generation) = self.session_sender().await?;
        self.call_on(sender, generation, command, on_progress).await
    }

    /// Dispatch on a known session, tearing it down if the call itself fails
    async fn call_on(
        &self,
        sender: mpsc::UnboundedSender<WorkerRequest>,
        generation: u64,
        command: WorkerCommand,
        on_progress: Option<&(dyn Fn(f32) + Send + Sync)>,
    ) -> Result<std::result::Result<WorkerReply, WorkerFault>> {
        let kind = command.kind();
        let timeout_ms = self.inner.timeout_ms(&command);

        let result = self
            .inner
            .dispatch(&sender, generation, command, timeout_ms, on_progress)
            .await;
        self.inner.touch().await;

        // a timed-out or vanished worker cannot serve further calls
        if let Err(ref e) = result {
            let mut state = self.inner.state.lock().await;
            if state.generation == generation && state.session.is_some() {
                error!(target: "worker", kind, error = %e, "Worker call failed; tearing down worker");
                self.inner
                    .teardown(&mut state, TerminationReason::Fatal(e.to_string()));
            }
        }
        result
    }

    /// Current session sender, booting a new worker when none is running
    async fn session_sender(&self) -> Result<(mpsc::UnboundedSender<WorkerRequest>, u64)> {
        let mut state = self.inner.state.lock().await;
        state.last_activity = Instant::now();
        let live = state
            .session
            .as_ref()
            .map(|s| (s.requests.clone(), s.generation));
        match live {
            Some((requests, generation)) if !requests.is_closed() => {
                return Ok((requests, generation));
            }
            Some(_) => self.inner.teardown(
                &mut state,
                TerminationReason::Fatal("worker thread exited".to_string()),
            ),
            None => {}
        }

        state.lifecycle = Lifecycle::Initializing;
        let attempts = self.inner.config.init_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            state.generation += 1;
            let generation = state.generation;
            match Inner::boot(&self.inner, generation).await {
                Ok(requests) => {
                    info!(target: "worker", generation, attempt, "Inference worker ready");
                    state.session = Some(WorkerSession {
                        requests: requests.clone(),
                        generation,
                    });
                    state.lifecycle = Lifecycle::Ready;
                    state.last_voice = None;
                    state.voices = None;
                    state.last_activity = Instant::now();
                    self.spawn_idle_watch(generation);
                    return Ok((requests, generation));
                }
                Err(e) => {
                    warn!(
                        target: "worker",
                        generation,
                        attempt,
                        attempts,
                        error = %e,
                        "Inference worker failed to initialize"
                    );
                    self.inner.drop_pending(generation);
                    last_error = Some(e);
                }
            }
        }

        let err = match last_error {
            Some(TtsError::WorkerInit(msg)) => TtsError::WorkerInit(msg),
            Some(other) => TtsError::WorkerInit(other.to_string()),
            None => TtsError::WorkerInit("no initialization attempted".to_string()),
        };
        state.lifecycle = Lifecycle::Terminated(TerminationReason::Fatal(err.to_string()));
        Err(err)
    }

    /// Terminate the session after `idle_timeout_ms` without calls
    fn spawn_idle_watch(&self, generation: u64) {
        let inner = Arc::downgrade(&self.inner);
        let idle = self.inner.config.idle_timeout();
        let tick = (idle / 4).clamp(Duration::from_millis(10), Duration::from_secs(5));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                let Some(inner) = inner.upgrade() else { break };
                let mut state = inner.state.lock().await;
                if state.generation != generation || state.session.is_none() {
                    break;
                }
                let busy = inner.pending.iter().any(|p| p.generation == generation);
                if !busy && state.last_activity.elapsed() >= idle {
                    info!(
                        target: "worker",
                        generation,
                        idle_ms = idle.as_millis() as u64,
                        "Inference worker idle; terminating"
                    );
                    inner.teardown(&mut state, TerminationReason::IdleTimeout);
                    break;
                }
            }
        });
    }
}

impl Inner {
    fn timeout_ms(&self, command: &WorkerCommand) -> u64 {
        match command {
            WorkerCommand::Init => self.config.boot_timeout_ms,
            WorkerCommand::Predict { .. } => self.config.inference_timeout_ms,
            WorkerCommand::Download { .. } => self.config.download_timeout_ms,
            WorkerCommand::ClearSessionCache => self.config.cache_clear_timeout_ms,
            WorkerCommand::ListVoices | WorkerCommand::ListStored | WorkerCommand::Remove { .. } => {
                self.config.control_timeout_ms
            }
        }
    }

    async fn touch(&self) {
        self.state.lock().await.last_activity = Instant::now();
    }

    /// Spawn a worker, wait for its ready signal, then run `Init`
    async fn boot(
        inner: &Arc<Inner>,
        generation: u64,
    ) -> Result<mpsc::UnboundedSender<WorkerRequest>> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let requests = spawn_worker(Arc::clone(&inner.factory), generation, events_tx)?;
        let boot_ms = inner.config.boot_timeout_ms;

        match timeout(Duration::from_millis(boot_ms), events_rx.recv()).await {
            Ok(Some(WorkerMessage::Ready)) => {}
            Ok(Some(WorkerMessage::BootFailed(msg))) => return Err(TtsError::WorkerInit(msg)),
            Ok(Some(WorkerMessage::Response { id, .. })) => {
                return Err(TtsError::WorkerInit(format!(
                    "Worker answered call {} before signalling ready",
                    id
                )))
            }
            Ok(None) => {
                return Err(TtsError::WorkerInit(
                    "Worker exited before signalling ready".to_string(),
                ))
            }
            Err(_) => {
                return Err(TtsError::WorkerTimeout {
                    kind: "boot",
                    timeout_ms: boot_ms,
                })
            }
        }

        Inner::spawn_reader(inner, generation, events_rx);

        match inner
            .dispatch(&requests, generation, WorkerCommand::Init, boot_ms, None)
            .await?
        {
            Ok(reply) => reply.into_ack()?,
            Err(fault) => return Err(fault.into_error("init", None)),
        }
        Ok(requests)
    }

    /// Route worker responses to pending calls by correlation id
    fn spawn_reader(
        inner: &Arc<Inner>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<WorkerMessage>,
    ) {
        let inner = Arc::downgrade(inner);
        tokio::spawn(async move {
            while let Some(message) = events.recv().await {
                let Some(inner) = inner.upgrade() else { return };
                match message {
                    WorkerMessage::Response { id, body } => inner.route(id, body),
                    WorkerMessage::Ready | WorkerMessage::BootFailed(_) => {
                        debug!(target: "worker", generation, "Ignoring late lifecycle message");
                    }
                }
            }
            debug!(target: "worker", generation, "Worker event reader exited");
            if let Some(inner) = inner.upgrade() {
                inner.drop_pending(generation);
            }
        });
    }

    fn route(&self, id: CallId, body: ResponseBody) {
        match body {
            ResponseBody::Progress(fraction) => {
                if let Some(call) = self.pending.get(&id) {
                    if let Some(progress) = call.progress.as_ref() {
                        let _ = progress.send(fraction);
                    }
                }
            }
            ResponseBody::Success(reply) => self.complete(id, Ok(reply)),
            ResponseBody::Error(fault) => self.complete(id, Err(fault)),
        }
    }

    fn complete(&self, id: CallId, outcome: std::result::Result<WorkerReply, WorkerFault>) {
        match self.pending.remove(&id) {
            Some((_, call)) => {
                let _ = call.reply.send(outcome);
            }
            None => debug!(target: "worker", id, "Dropping response for unknown or stale call"),
        }
    }

    /// Fail every call still waiting on session `generation`
    fn drop_pending(&self, generation: u64) {
        self.pending.retain(|_, call| call.generation != generation);
    }

    async fn dispatch(
        &self,
        sender: &mpsc::UnboundedSender<WorkerRequest>,
        generation: u64,
        command: WorkerCommand,
        timeout_ms: u64,
        on_progress: Option<&(dyn Fn(f32) + Send + Sync)>,
    ) -> Result<std::result::Result<WorkerReply, WorkerFault>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let kind = command.kind();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let (progress_tx, mut progress_rx) = match on_progress {
            Some(_) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        self.pending.insert(
            id,
            PendingCall {
                generation,
                reply: reply_tx,
                progress: progress_tx,
            },
        );

        debug!(target: "worker", id, kind, "Sending call");
        if sender.send(WorkerRequest { id, command }).is_err() {
            self.pending.remove(&id);
            return Err(TtsError::Engine(format!(
                "Inference worker is not running ({})",
                kind
            )));
        }

        let wait = async {
            loop {
                let progress = async {
                    match progress_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    biased;
                    Some(fraction) = progress => {
                        if let Some(callback) = on_progress {
                            callback(fraction);
                        }
                    }
                    reply = &mut reply_rx => return reply,
                }
            }
        };

        match timeout(Duration::from_millis(timeout_ms), wait).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(TtsError::Engine(format!(
                "Inference worker exited during '{}'",
                kind
            ))),
            Err(_) => {
                self.pending.remove(&id);
                warn!(target: "worker", id, kind, timeout_ms, "Worker call timed out");
                Err(TtsError::WorkerTimeout { kind, timeout_ms })
            }
        }
    }

    /// Drop the session and reset all lifecycle state
    fn teardown(&self, state: &mut CoordinatorState, reason: TerminationReason) {
        let Some(session) = state.session.take() else {
            return;
        };
        info!(
            target: "worker",
            generation = session.generation,
            reason = %reason,
            "Terminating inference worker"
        );
        drop(session.requests);
        self.drop_pending(session.generation);
        state.lifecycle = Lifecycle::Terminated(reason);
        state.last_voice = None;
        state.voices = None;
    }
}
