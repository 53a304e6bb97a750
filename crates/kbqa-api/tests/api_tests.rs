//! API Integration Tests
//!
//! Each test builds a router over a temporary document directory with the
//! local hashing embedder and a scripted LLM, so no network is needed.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use kbqa_api::{create_router, state::AppState};
use kbqa_core::{AppConfig, EmbeddingProvider, GenerationRequest, KbqaError, LlmClient, Result};
use kbqa_rag::{KnowledgeBase, FALLBACK_ANSWER};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Answers with the first line of the context it was given
struct FirstPassageLlm {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for FirstPassageLlm {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let first = request.context.lines().next().unwrap_or_default();
        Ok(format!("Answer: {first}"))
    }

    fn name(&self) -> &str {
        "first-passage"
    }
}

struct BrokenLlm;

#[async_trait]
impl LlmClient for BrokenLlm {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Err(KbqaError::GenerationError("HTTP 500: upstream exploded".into()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

struct TestApp {
    router: Router,
    docs: TempDir,
}

fn test_config(docs: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.embedding.provider = EmbeddingProvider::Hashing;
    config.embedding.dimension = Some(256);
    config.rag.documents_dir = docs.to_path_buf();
    config.index.snapshot_path = None;
    config.llm.max_retries = 0;
    config
}

const CORPUS: &[(&str, &str)] = &[
    ("lists.txt", "Python lists are mutable sequences"),
    ("gui.md", "Tkinter builds desktop GUIs"),
];

async fn build_app(llm: Arc<dyn LlmClient>) -> TestApp {
    build_app_with(llm, CORPUS).await
}

async fn build_app_with(llm: Arc<dyn LlmClient>, files: &[(&str, &str)]) -> TestApp {
    let docs = tempfile::tempdir().unwrap();
    for (name, text) in files {
        fs::write(docs.path().join(name), text).unwrap();
    }

    let kb = KnowledgeBase::open_with_llm(test_config(docs.path()), llm)
        .await
        .unwrap();
    let state = Arc::new(AppState::new(kb));

    TestApp {
        router: create_router(state),
        docs,
    }
}

async fn default_app() -> TestApp {
    build_app(Arc::new(FirstPassageLlm {
        calls: AtomicUsize::new(0),
    }))
    .await
}

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = default_app().await;

    let (status, json) = send_json(&app.router, create_json_request("GET", "/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_readiness_check() {
    let app = default_app().await;

    let (status, json) = send_json(&app.router, create_json_request("GET", "/ready", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"]["index_chunks"], 2);
    assert_eq!(json["checks"]["embedding_model"], "hashing-v1");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = default_app().await;

    // One request first so the per-endpoint series exist
    send(&app.router, create_json_request("GET", "/health", None)).await;
    let (status, body) = send(&app.router, create_json_request("GET", "/metrics", None)).await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("kbqa_uptime_seconds"));
    assert!(text.contains("kbqa_index_chunks{collection=\"rag_docs\"} 2"));
    assert!(text.contains("kbqa_http_requests_total{endpoint=\"/health\",status=\"200\"} 1"));
}

#[tokio::test]
async fn test_openapi_document() {
    let app = default_app().await;

    let (status, json) = send_json(
        &app.router,
        create_json_request("GET", "/api-docs/openapi.json", None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/api/v1/query"].is_object());
    assert!(json["paths"]["/api/v1/index/reindex"].is_object());
}

// =============================================================================
// Query Tests
// =============================================================================

#[tokio::test]
async fn test_query_returns_grounded_answer() {
    let app = default_app().await;

    let (status, json) = send_json(
        &app.router,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({ "question": "What is a mutable sequence?", "top_k": 1 })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["grounded"], true);
    assert_eq!(json["answer"], "Answer: Python lists are mutable sequences");
    assert_eq!(json["passages"].as_array().unwrap().len(), 1);
    assert_eq!(json["passages"][0]["text"], "Python lists are mutable sequences");
}

#[tokio::test]
async fn test_query_empty_question() {
    let app = default_app().await;

    let (status, json) = send_json(
        &app.router,
        create_json_request("POST", "/api/v1/query", Some(json!({ "question": "   " }))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_query_top_k_out_of_range() {
    let app = default_app().await;

    for top_k in [0, 11] {
        let (status, _) = send(
            &app.router,
            create_json_request(
                "POST",
                "/api/v1/query",
                Some(json!({ "question": "lists", "top_k": top_k })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "top_k = {top_k}");
    }
}

#[tokio::test]
async fn test_query_on_empty_index_returns_fallback() {
    let llm = Arc::new(FirstPassageLlm {
        calls: AtomicUsize::new(0),
    });
    let app = build_app_with(llm.clone(), &[]).await;

    let (status, json) = send_json(
        &app.router,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({ "question": "What is a mutable sequence?" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["grounded"], false);
    assert_eq!(json["answer"], FALLBACK_ANSWER);
    assert!(json["passages"].as_array().unwrap().is_empty());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_generation_failure_is_bad_gateway() {
    let app = build_app(Arc::new(BrokenLlm)).await;

    let (status, json) = send_json(
        &app.router,
        create_json_request(
            "POST",
            "/api/v1/query",
            Some(json!({ "question": "What is a mutable sequence?" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "GENERATION_FAILED");
    assert!(!json["message"].as_str().unwrap().contains("exploded"));
}

// =============================================================================
// Search and Index Tests
// =============================================================================

#[tokio::test]
async fn test_search() {
    let app = default_app().await;

    let (status, json) = send_json(
        &app.router,
        create_json_request(
            "POST",
            "/api/v1/search",
            Some(json!({ "query": "desktop GUIs", "top_k": 5 })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let total = json["total"].as_u64().unwrap();
    assert!((1..=2).contains(&total));
    assert_eq!(json["results"][0]["text"], "Tkinter builds desktop GUIs");
}

#[tokio::test]
async fn test_search_rejects_zero_top_k() {
    let app = default_app().await;

    let (status, _) = send(
        &app.router,
        create_json_request(
            "POST",
            "/api/v1/search",
            Some(json!({ "query": "lists", "top_k": 0 })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_index_stats() {
    let app = default_app().await;

    let (status, json) = send_json(
        &app.router,
        create_json_request("GET", "/api/v1/index/stats", None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["chunk_count"], 2);
    assert_eq!(json["document_count"], 2);
    assert_eq!(json["dimension"], 256);
}

#[tokio::test]
async fn test_reindex_picks_up_new_documents() {
    let app = default_app().await;
    fs::write(
        app.docs.path().join("rust.txt"),
        "Rust ownership prevents data races",
    )
    .unwrap();
    fs::write(app.docs.path().join("empty.txt"), "   ").unwrap();

    let (status, json) = send_json(
        &app.router,
        create_json_request("POST", "/api/v1/index/reindex", None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["documents_ingested"], 3);
    assert_eq!(json["failures"].as_array().unwrap().len(), 1);

    let (_, stats) = send_json(
        &app.router,
        create_json_request("GET", "/api/v1/index/stats", None),
    )
    .await;
    assert_eq!(stats["document_count"], 3);
}

#[tokio::test]
async fn test_unknown_route() {
    let app = default_app().await;

    let (status, _) = send(&app.router, create_json_request("GET", "/api/v1/nope", None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
