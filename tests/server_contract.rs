//! HTTP contract tests for `POST /api/v1/conversation`.
//!
//! Start a real server on an ephemeral port and talk to it with reqwest.

mod common;

use common::harness;
use glitchcube::CubeServer;
use glitchcube::config::ServerConfig;
use glitchcube::conversation::ConversationStore;
use glitchcube::llm::LlmError;
use glitchcube::server::CONVERSATION_PATH;
use serde_json::{Value, json};

fn local() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    }
}

async fn post(server: &CubeServer, body: reqwest::Body) -> (u16, Value) {
    let url = format!("http://{}{CONVERSATION_PATH}", server.addr());
    let response = reqwest::Client::new()
        .post(url)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

// ────────────────────────────────────────────────────────────────────────────
// Success path
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_voice_turn_returns_hass_envelope() {
    let h = harness(vec![Ok(json!({
        "speech_text": "Hey there, stranger!",
        "continue_conversation": true
    }))]);
    let server = CubeServer::start(h.pipeline.clone(), &local()).await.unwrap();

    let body = json!({
        "message": "hello",
        "context": {
            "conversation_id": "01HXYZ",
            "device_id": "satellite-1",
            "language": "en",
            "voice_interaction": true,
            "timestamp": "2026-08-30T21:04:00Z",
            "ha_context": {"agent_id": "conversation.glitchcube"}
        }
    });
    let (status, envelope) = post(&server, body.to_string().into()).await;

    assert_eq!(status, 200);
    assert_eq!(envelope["success"], true);
    let data = &envelope["data"];
    assert_eq!(data["conversation_id"], "01HXYZ");
    assert_eq!(data["continue_conversation"], true);
    assert_eq!(data["end_conversation"], false);
    assert_eq!(data["continue_delay"], 3);
    assert_eq!(data["response"]["response_type"], "query_answer");
    assert_eq!(data["response"]["language"], "en");
    assert_eq!(
        data["response"]["speech"]["plain"]["speech"],
        "Hey there, stranger!"
    );
    assert!(data.get("error_details").is_none());

    let conversation = h.store.find_by_session("voice_01HXYZ").unwrap().unwrap();
    assert_eq!(conversation.metadata.device_id.as_deref(), Some("satellite-1"));
    assert_eq!(conversation.metadata.source.as_deref(), Some("voice"));
    assert_eq!(
        conversation.metadata.agent_id.as_deref(),
        Some("conversation.glitchcube")
    );

    server.shutdown().await;
}

// ────────────────────────────────────────────────────────────────────────────
// Failure paths
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pipeline_failure_is_spoken_apology() {
    let h = harness(vec![Err(LlmError::TimeoutError("no response".into()))]);
    let server = CubeServer::start(h.pipeline.clone(), &local()).await.unwrap();

    let body = json!({"message": "hi", "context": {"session_id": "abc"}});
    let (status, envelope) = post(&server, body.to_string().into()).await;

    assert_eq!(status, 200);
    assert_eq!(envelope["success"], true);
    let data = &envelope["data"];
    assert_eq!(data["response_type"], "error");
    assert_eq!(data["error_details"], "LLM_CALL_FAILED");
    assert_eq!(
        data["speech_text"],
        "I'm sorry, I encountered an error processing your request."
    );
    assert_eq!(data["end_conversation"], true);
    assert!(data.get("continue_delay").is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_session_is_invalid_input() {
    let h = harness(vec![]);
    let server = CubeServer::start(h.pipeline.clone(), &local()).await.unwrap();

    let (status, envelope) = post(&server, json!({"message": "hi"}).to_string().into()).await;

    assert_eq!(status, 200);
    assert_eq!(envelope["data"]["error_details"], "INVALID_INPUT");
    assert!(h.llm.requests().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let h = harness(vec![]);
    let server = CubeServer::start(h.pipeline.clone(), &local()).await.unwrap();

    let (status, envelope) = post(&server, "{\"message\": ".into()).await;

    assert_eq!(status, 400);
    assert_eq!(envelope["success"], false);
    assert!(envelope["error"].as_str().is_some_and(|e| !e.is_empty()));
    assert!(envelope.get("data").is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_message_field_is_bad_request() {
    let h = harness(vec![]);
    let server = CubeServer::start(h.pipeline.clone(), &local()).await.unwrap();

    let body = json!({"context": {"session_id": "abc"}});
    let (status, envelope) = post(&server, body.to_string().into()).await;

    assert_eq!(status, 400);
    assert_eq!(envelope["success"], false);

    server.shutdown().await;
}
