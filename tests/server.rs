mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use common::{brochure_text, FakeLlm, Harness};
use ragchat::app::App;
use ragchat::chat::FALLBACK_ANSWER;
use ragchat::server::{router, spawn_watchdog};
use ragchat_core::models::{DocumentRecord, DocumentStatus};
use ragchat_core::store::DocumentStatusStore;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not start within 5 seconds");
}

async fn start(h: &Harness) -> String {
    let app = Arc::new(App {
        documents: h.documents.clone(),
        pipeline: Some(Arc::new(h.pipeline())),
        chat: Arc::new(h.engine(h.settings(), None)),
        stale_after: chrono::Duration::hours(1),
    });
    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(app)).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn wait_for_status(client: &reqwest::Client, base: &str, id: &str, want: &str) -> Value {
    for _ in 0..50 {
        let resp = client
            .get(format!("{}/documents/{}", base, id))
            .send()
            .await
            .unwrap();
        if resp.status().is_success() {
            let body: Value = resp.json().await.unwrap();
            if body["status"] == want {
                return body;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("document {} never reached {}", id, want);
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let h = Harness::new(tmp.path(), FakeLlm::new("ok"));
    let base = start(&h).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ingest_then_chat_over_http() {
    let tmp = TempDir::new().unwrap();
    let h = Harness::new(tmp.path(), FakeLlm::new("Two years, parts and labour."));
    h.extractor.set("public/brochure.pdf", &brochure_text());
    let base = start(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/documents/brochure.pdf/ingest", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let accepted: Value = resp.json().await.unwrap();
    assert_eq!(accepted["documentId"], "brochure.pdf");
    assert!(!accepted["runId"].as_str().unwrap().is_empty());

    let record = wait_for_status(&client, &base, "brochure.pdf", "COMPLETED").await;
    assert_eq!(record["indexPointer"], "indexes/brochure.pdf-vectorstore.zip");

    let list: Value = client
        .get(format!("{}/documents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["documents"].as_array().unwrap().len(), 1);

    let reply: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({
            "question": "What is the warranty?",
            "providerConfig": {"documentId": "brochure.pdf"}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["answer"], "Two years, parts and labour.");
    assert_eq!(reply["sources"][0]["fileName"], "brochure.pdf");
    let id = reply["conversationId"].as_str().unwrap().to_string();

    let follow: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({"question": "How long is it?", "conversationId": id}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(follow["conversationId"], id.as_str());
    assert_ne!(follow["answer"], FALLBACK_ANSWER);
}

#[tokio::test]
async fn test_failed_ingest_is_visible() {
    let tmp = TempDir::new().unwrap();
    let h = Harness::new(tmp.path(), FakeLlm::new("ok"));
    let base = start(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/documents/missing.pdf/ingest", base))
        .json(&json!({"location": "public/missing.pdf"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let record = wait_for_status(&client, &base, "missing.pdf", "FAILED").await;
    assert!(record.get("indexPointer").is_none());
}

#[tokio::test]
async fn test_error_contract() {
    let tmp = TempDir::new().unwrap();
    let h = Harness::new(tmp.path(), FakeLlm::new("ok"));
    let base = start(&h).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/documents/nope.pdf", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({"question": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/documents/a.pdf/ingest", base))
        .json(&json!({"location": "public/b.pdf"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_watchdog_with_zero_period_keeps_running() {
    let tmp = TempDir::new().unwrap();
    let h = Harness::new(tmp.path(), FakeLlm::new("ok"));
    let old = chrono::Utc::now() - chrono::Duration::hours(2);
    h.documents
        .put(&DocumentRecord::pending("stuck.pdf", old))
        .await
        .unwrap();
    let app = Arc::new(App {
        documents: h.documents.clone(),
        pipeline: None,
        chat: Arc::new(h.engine(h.settings(), None)),
        stale_after: chrono::Duration::hours(1),
    });

    let handle = spawn_watchdog(app, std::time::Duration::ZERO);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    handle.abort();

    let record = h.documents.get("stuck.pdf").await.unwrap().unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
}
