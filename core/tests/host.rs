/// JSON host protocol tests
mod common;

use clipvoice_core::transport::InMemoryKvStore;
use clipvoice_core::TtsHost;
use common::{harness, harness_with, script, test_config};
use serde_json::{json, Value};

const AMY: &str = "en_US-amy-medium";
const HFC: &str = "en_US-hfc_female-medium";
const IRINA: &str = "ru_RU-irina-medium";

async fn call(host: &TtsHost, request: Value) -> Value {
    let raw = host.handle_json(&request.to_string()).await;
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn test_health_check_before_first_use() {
    let h = harness(script(&[AMY], &[]));

    let response = call(&h.host, json!({"action": "healthCheck"})).await;
    assert_eq!(response, json!({"success": true, "ready": true, "worker": "uninitialized"}));
    assert_eq!(h.script.lock().unwrap().boots, 0);
}

#[tokio::test]
async fn test_malformed_request() {
    let h = harness(script(&[AMY], &[]));

    let raw = h.host.handle_json("{not json").await;
    let response: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(response["success"], false);
    assert_eq!(response["code"], "INVALID_REQUEST");

    let response = call(&h.host, json!({"action": "dance"})).await;
    assert_eq!(response["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn test_list_voices_is_filtered_and_ordered() {
    let h = harness(script(
        &[IRINA, "en_US-amy-low", AMY, "sw_CD-lanfrica-medium", HFC],
        &[],
    ));

    let response = call(&h.host, json!({"action": "listVoices"})).await;
    assert_eq!(response["success"], true);
    let ids: Vec<&str> = response["voices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![AMY, HFC, IRINA]);
    assert_eq!(response["voices"][0]["languageCode"], "en");
}

#[tokio::test]
async fn test_download_list_and_remove_voice() {
    let h = harness(script(&[AMY], &[]));
    h.script.lock().unwrap().supports_remove = true;

    let response = call(&h.host, json!({"action": "downloadVoice", "voiceId": AMY})).await;
    assert_eq!(response, json!({"success": true, "voiceId": AMY, "downloaded": true}));

    let response = call(&h.host, json!({"action": "downloadVoice", "voiceId": AMY})).await;
    assert_eq!(response["downloaded"], false);

    let response = call(&h.host, json!({"action": "listStoredVoices"})).await;
    assert_eq!(response, json!({"success": true, "voices": [AMY]}));

    let response = call(&h.host, json!({"action": "removeVoice", "voiceId": AMY})).await;
    assert_eq!(response, json!({"success": true, "voiceId": AMY, "removed": true}));

    let response = call(&h.host, json!({"action": "listStoredVoices"})).await;
    assert_eq!(response["voices"], json!([]));
}

#[tokio::test]
async fn test_voice_actions_require_canonical_ids() {
    let h = harness(script(&[AMY], &[]));

    let response = call(&h.host, json!({"action": "downloadVoice", "voiceId": "amy"})).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["code"], "VOICE_RESOLUTION_FAILED");

    let response = call(&h.host, json!({"action": "removeVoice", "voiceId": ""})).await;
    assert_eq!(response["code"], "VOICE_RESOLUTION_FAILED");
}

#[tokio::test]
async fn test_remove_without_engine_support_reports_not_removed() {
    let h = harness(script(&[AMY], &[AMY]));

    let response = call(&h.host, json!({"action": "removeVoice", "voiceId": AMY})).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["removed"], false);
}

#[tokio::test]
async fn test_external_audio_fetch_and_release() {
    let mut config = test_config();
    config.transport.inline_threshold_bytes = 16;
    let h = harness_with(script(&[HFC], &[HFC]), config, InMemoryKvStore::new(), None);

    let response = call(
        &h.host,
        json!({"action": "synthesize", "text": "Hello. World!", "options": {"language": "en"}}),
    )
    .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["method"], "external");
    assert!(response.get("audioData").is_none());
    let key = response["storageKey"].as_str().unwrap().to_string();
    let size = response["size"].as_u64().unwrap();

    let fetched = call(&h.host, json!({"action": "fetchAudio", "storageKey": key})).await;
    assert_eq!(fetched["success"], true);
    assert_eq!(fetched["size"].as_u64().unwrap(), size);
    assert_eq!(fetched["audioData"].as_array().unwrap().len() as u64, size);

    let released = call(&h.host, json!({"action": "releaseAudio", "storageKey": key})).await;
    assert_eq!(released["released"], true);

    let missing = call(&h.host, json!({"action": "fetchAudio", "storageKey": key})).await;
    assert_eq!(missing["success"], false);
    assert_eq!(missing["code"], "NOT_FOUND");

    let malformed = call(&h.host, json!({"action": "fetchAudio", "storageKey": "../escape"})).await;
    assert_eq!(malformed["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_inline_response_metadata() {
    let h = harness(script(&[HFC], &[HFC]));

    let response = call(
        &h.host,
        json!({"action": "synthesize", "text": "Hello. World!", "options": {"language": "en", "voice": ""}}),
    )
    .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["method"], "inline");
    assert_eq!(response["voiceId"], HFC);
    assert_eq!(response["language"], "en");
    assert_eq!(response["chunks"], 1);
    assert_eq!(response["sampleRate"], common::SAMPLE_RATE);
    let audio = response["audioData"].as_array().unwrap();
    assert_eq!(audio.len() as u64, response["size"].as_u64().unwrap());
    assert_eq!(audio[0], u64::from(b'R'));
    assert!(response.get("warnings").is_none());
}
