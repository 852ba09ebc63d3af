mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use ragloop::config::{parse_config, Config};
use ragloop::server::{router, AppState};
use ragloop_core::models::{ChunkType, StreamChunk};

fn config() -> Config {
    let mut config = parse_config("[db]\npath = \"./unused.sqlite\"\n").unwrap();
    let mut workspaces = BTreeMap::new();
    workspaces.insert("handbook".to_string(), workspace().settings);
    config.workspaces = workspaces;
    config
}

async fn start(llm: Arc<ScriptedLlm>, chats: Arc<RecordingChats>) -> String {
    let search = RecordingSearch::new(found(vec![chunk("d1", 0, "PTO", "20 days")]));
    let state = AppState::new(Arc::new(config()), Arc::new(deps(llm, search, chats)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Parse `data:` lines of an SSE body into stream chunks.
fn parse_events(body: &str) -> Vec<StreamChunk> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let base = start(ScriptedLlm::texts(Vec::<String>::new()), RecordingChats::new()).await;
    let json: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_chat_streams_events() {
    let llm = ScriptedLlm::texts(vec![SEARCH.to_string(), final_answer("20 days")]);
    let chats = RecordingChats::new();
    let base = start(llm, chats.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/workspaces/handbook/react-chat", base))
        .json(&serde_json::json!({"message": "How much PTO?", "threadId": "t-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    let events = parse_events(&response.text().await.unwrap());
    let last = events.last().unwrap();
    assert_eq!(last.kind, ChunkType::FinalizeResponseStream);
    assert!(events
        .iter()
        .any(|e| e.kind == ChunkType::TextResponseChunk
            && e.text_response.as_deref() == Some("20 days")));
    let uuid = &events[0].uuid;
    assert!(events.iter().all(|e| &e.uuid == uuid));

    let saved = chats.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].thread_id.as_deref(), Some("t-1"));
}

#[tokio::test]
async fn test_unknown_workspace_is_404() {
    let base = start(ScriptedLlm::texts(Vec::<String>::new()), RecordingChats::new()).await;
    let response = reqwest::Client::new()
        .post(format!("{}/workspaces/missing/react-chat", base))
        .json(&serde_json::json!({"message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_empty_message_is_400() {
    let base = start(ScriptedLlm::texts(Vec::<String>::new()), RecordingChats::new()).await;
    let response = reqwest::Client::new()
        .post(format!("{}/workspaces/handbook/react-chat", base))
        .json(&serde_json::json!({"message": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"]["code"], "bad_request");
}
