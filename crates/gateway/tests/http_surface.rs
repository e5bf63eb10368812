//! HTTP control-surface contract: health, RPC status codes, UI response
//! resolution, and SSE delivery.

mod common;

use serde_json::json;

use common::{text_reply, Harness, ScriptedProvider};

async fn spawn_http(harness: &Harness) -> String {
    let app = coda_gateway::api::http::router(harness.state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn health_reports_session_and_readiness() {
    let harness = Harness::new(ScriptedProvider::new(vec![])).await;
    let base = spawn_http(&harness).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ready"], true);
    assert_eq!(body["isStreaming"], false);
    assert!(body["sessionId"].is_string());

    let response = reqwest::get(format!("{base}/health?ready=true")).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn rpc_rejects_malformed_and_unknown_commands_with_400() {
    let harness = Harness::new(ScriptedProvider::new(vec![])).await;
    let base = spawn_http(&harness).await;
    let client = reqwest::Client::new();

    // Missing type field.
    let response = client
        .post(format!("{base}/rpc"))
        .json(&json!({"message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("missing type"));

    // Unknown type.
    let response = client
        .post(format!("{base}/rpc"))
        .json(&json!({"type": "frobnicate"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Not JSON at all.
    let response = client
        .post(format!("{base}/rpc"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // A valid command still works.
    let response = client
        .post(format!("{base}/rpc"))
        .json(&json!({"id": "1", "type": "get_state"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["type"], "response");
}

#[tokio::test]
async fn oversized_bodies_are_rejected_with_400() {
    let harness = Harness::new(ScriptedProvider::new(vec![])).await;
    let base = spawn_http(&harness).await;
    let client = reqwest::Client::new();

    let huge = "x".repeat(2 * 1024 * 1024);
    let response = client
        .post(format!("{base}/rpc"))
        .json(&json!({"type": "prompt", "message": huge}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn extension_ui_response_accepts_unknown_ids() {
    let harness = Harness::new(ScriptedProvider::new(vec![])).await;
    let base = spawn_http(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/extension_ui_response"))
        .json(&json!({"id": uuid::Uuid::new_v4(), "value": true}))
        .send()
        .await
        .unwrap();
    // Unknown id = already timed out; still 200.
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["resolved"], false);
}

#[tokio::test]
async fn sse_stream_carries_agent_events() {
    let harness = Harness::new(ScriptedProvider::new(vec![text_reply("streamed")])).await;
    let base = spawn_http(&harness).await;
    let client = reqwest::Client::new();

    let mut sse = client
        .get(format!("{base}/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(sse.status(), 200);

    harness
        .rpc(json!({"type": "prompt", "message": "hi"}))
        .await;
    harness.wait_idle().await;

    // Read until the agent_end event shows up on the wire.
    let mut buffer = String::new();
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(std::time::Duration::from_secs(2), sse.chunk()).await {
            Ok(Ok(Some(bytes))) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                if buffer.contains("agent_end") {
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(buffer.contains("event: agent_event"), "got: {buffer}");
    assert!(buffer.contains("text_delta"));
    assert!(buffer.contains("agent_end"));
}
