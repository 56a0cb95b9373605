//! The dedicated inference thread.
//!
//! The engine is owned by one OS thread running its own current-thread tokio
//! runtime, so engine calls never run on the control runtime. Requests are
//! handled strictly one at a time in arrival order.

use super::protocol::{ResponseBody, WorkerCommand, WorkerMessage, WorkerReply, WorkerRequest};
use crate::engine::{EngineFactory, InferenceEngine};
use crate::{Result, TtsError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub(crate) const WORKER_THREAD_NAME: &str = "tts-inference";

/// Spawn the worker thread for session `generation`.
///
/// Dropping the returned sender ends the worker loop once the call in progress
/// finishes.
pub(crate) fn spawn_worker(
    factory: Arc<dyn EngineFactory>,
    generation: u64,
    events: mpsc::UnboundedSender<WorkerMessage>,
) -> Result<mpsc::UnboundedSender<WorkerRequest>> {
    let (tx, rx) = mpsc::unbounded_channel::<WorkerRequest>();

    std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = events.send(WorkerMessage::BootFailed(format!(
                        "Failed to build worker runtime: {}",
                        e
                    )));
                    return;
                }
            };

            let engine = match factory.create() {
                Ok(engine) => engine,
                Err(e) => {
                    error!(target: "worker", generation, error = %e, "Engine construction failed");
                    let _ = events.send(WorkerMessage::BootFailed(e.to_string()));
                    return;
                }
            };

            if events.send(WorkerMessage::Ready).is_err() {
                return;
            }
            info!(target: "worker", generation, "Inference worker started");
            runtime.block_on(run_loop(engine, rx, events));
            info!(target: "worker", generation, "Inference worker stopped");
        })
        .map_err(|e| TtsError::WorkerInit(format!("Failed to spawn worker thread: {}", e)))?;

    Ok(tx)
}

async fn run_loop(
    mut engine: Box<dyn InferenceEngine>,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    events: mpsc::UnboundedSender<WorkerMessage>,
) {
    while let Some(WorkerRequest { id, command }) = requests.recv().await {
        debug!(target: "worker", id, kind = command.kind(), "Handling call");
        let result = execute(engine.as_mut(), id, command, &events).await;
        let body = match result {
            Ok(reply) => ResponseBody::Success(reply),
            Err(e) => ResponseBody::Error(e.into()),
        };
        if events.send(WorkerMessage::Response { id, body }).is_err() {
            break;
        }
    }
}

async fn execute(
    engine: &mut dyn InferenceEngine,
    id: u64,
    command: WorkerCommand,
    events: &mpsc::UnboundedSender<WorkerMessage>,
) -> std::result::Result<WorkerReply, crate::EngineError> {
    match command {
        WorkerCommand::Init => engine.init().await.map(|_| WorkerReply::Ack),
        WorkerCommand::Predict { text, voice_id } => {
            engine.predict(&text, &voice_id).await.map(WorkerReply::Audio)
        }
        WorkerCommand::ListVoices => engine.voices().await.map(WorkerReply::Voices),
        WorkerCommand::ListStored => engine.stored().await.map(WorkerReply::Stored),
        WorkerCommand::Download { voice_id } => {
            let progress_tx = events.clone();
            let progress = move |fraction: f32| {
                let _ = progress_tx.send(WorkerMessage::Response {
                    id,
                    body: ResponseBody::Progress(fraction.clamp(0.0, 1.0)),
                });
            };
            engine
                .download(&voice_id, &progress)
                .await
                .map(|_| WorkerReply::Ack)
        }
        WorkerCommand::Remove { voice_id } => {
            engine.remove(&voice_id).await.map(|_| WorkerReply::Ack)
        }
        WorkerCommand::ClearSessionCache => {
            engine.clear_session_cache().await.map(|_| WorkerReply::Ack)
        }
    }
}
