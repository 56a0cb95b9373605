//! Line-oriented host for the synthesis engine.
//!
//! Each stdin line is one JSON host request. Responses and synthesis
//! progress events are written to stdout, one JSON document per line.
//! Requests run concurrently; the worker serializes inference.

use clipvoice_core::transport::{BlobStore, FsBlobStore, KeyValueStore};
use clipvoice_core::{
    telemetry, CancellationFlag, HostRequest, HostResponse, ModelCacheManager, SynthesisEvent,
    SynthesisOrchestrator, TransportSelector, TtsConfig, TtsHost, WorkerCoordinator,
};
use clipvoice_piper::PiperConfig;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init_tracing()?;

    let cfg = TtsConfig::load();
    let piper = PiperConfig::default();
    info!(
        target: "clip_tts",
        voice_dir = %piper.voice_dir.display(),
        piper_bin = ?piper.piper_bin,
        "Starting ClipVoice host"
    );

    let worker = WorkerCoordinator::new(clipvoice_piper::factory(piper.clone()), cfg.worker.clone());
    let cache = ModelCacheManager::new(worker.clone(), cfg.cache.clone());
    let blobs: Arc<dyn BlobStore> = FsBlobStore::new(piper.temp_dir.join("clipvoice-audio"))?;
    let transport = TransportSelector::new(cfg.transport.clone(), open_kv_store()?, Some(blobs));
    let host = TtsHost::new(SynthesisOrchestrator::new(&cfg, cache, transport));

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let host = host.clone();
                    let out = out_tx.clone();
                    tokio::spawn(async move { serve_line(host, line, out).await });
                }
                Ok(None) => {
                    info!(target: "clip_tts", "stdin closed");
                    break;
                }
                Err(e) => {
                    error!(target: "clip_tts", error = %e, "Failed to read stdin");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                info!(target: "clip_tts", "Interrupted");
                break;
            }
        }
    }

    host.orchestrator().cache().worker().terminate().await;
    drop(out_tx);
    let _ = writer.await;
    info!(target: "clip_tts", "ClipVoice host stopped");
    Ok(())
}

async fn serve_line(host: TtsHost, line: String, out: mpsc::UnboundedSender<String>) {
    let request = match serde_json::from_str::<HostRequest>(&line) {
        Ok(request) => request,
        Err(_) => {
            // handle_json produces the INVALID_REQUEST response
            let _ = out.send(host.handle_json(&line).await);
            return;
        }
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SynthesisEvent>();
    let event_out = out.clone();
    let forward = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    let _ = event_out.send(json);
                }
                Err(e) => warn!(target: "clip_tts", error = %e, "Dropping unencodable event"),
            }
        }
    });

    let response = host
        .handle_with(request, Some(events_tx), CancellationFlag::new())
        .await;
    let _ = forward.await;
    let _ = out.send(encode(&response));
}

fn encode(response: &HostResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(
            r#"{{"success":false,"error":"Failed to encode response: {}","code":"SERIALIZATION_ERROR"}}"#,
            e
        )
    })
}

#[cfg(feature = "rocksdb")]
fn open_kv_store() -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error + Send + Sync>> {
    let path = std::env::var("CLIPVOICE_KV_PATH").unwrap_or_else(|_| "clipvoice-kv".to_string());
    Ok(clipvoice_core::transport::RocksKvStore::new(path)?)
}

#[cfg(not(feature = "rocksdb"))]
fn open_kv_store() -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(clipvoice_core::transport::InMemoryKvStore::new())
}
