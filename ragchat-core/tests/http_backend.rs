//! Integration tests for the HTTP backend client against an in-process
//! mock RAG server.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use ragchat_core::backend::{fetch_model_listing, HttpBackend, ModelListing, RagBackend};
use ragchat_core::config::{BackendConfig, PayloadFormat, StreamTransport};
use ragchat_core::types::{CompletionRequest, HistoryTurn, Role};
use ragchat_core::{dispatch, BackendError, ChatSession, DispatchOutcome, NoOpCallback};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Payloads = Arc<Mutex<Vec<Value>>>;

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn backend(url: String) -> HttpBackend {
    HttpBackend::new(BackendConfig {
        url,
        ..BackendConfig::default()
    })
    .unwrap()
}

fn sse(events: &[&str]) -> impl IntoResponse {
    let body: String = events.iter().map(|e| format!("data: {}\n\n", e)).collect();
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

/// A backend that answers every completion with the given SSE events and
/// records the payloads it received.
async fn sse_server(events: &'static [&'static str]) -> (String, Payloads) {
    let payloads: Payloads = Arc::default();
    let app = Router::new()
        .route(
            "/rag-query/stream",
            post(
                move |State(seen): State<Payloads>, Json(payload): Json<Value>| async move {
                    seen.lock().unwrap().push(payload);
                    sse(events)
                },
            ),
        )
        .with_state(payloads.clone());
    (spawn(app).await, payloads)
}

fn request(message: &str) -> CompletionRequest {
    CompletionRequest {
        model: Some("granite".into()),
        message: message.into(),
        history: vec![
            HistoryTurn {
                role: Role::User,
                text: "earlier".into(),
            },
            HistoryTurn {
                role: Role::Assistant,
                text: "answer".into(),
            },
        ],
    }
}

// --- /models ---

#[tokio::test]
async fn test_list_models_plain_array() {
    let app = Router::new().route(
        "/models",
        get(|| async { Json(serde_json::json!(["granite", "mistral", "llama"])) }),
    );
    let backend = backend(spawn(app).await);

    let catalog = backend.list_models().await.unwrap();
    assert_eq!(catalog.names(), vec!["granite", "mistral", "llama"]);
    assert_eq!(catalog.default_model.as_deref(), Some("granite"));
}

#[tokio::test]
async fn test_list_models_catalog_form() {
    let app = Router::new().route(
        "/models",
        get(|| async {
            Json(serde_json::json!({
                "models": [
                    {"name": "granite", "model_type": "vllm"},
                    {"name": "gpt-4o", "model_type": "openai"},
                    {"name": "mistral", "model_type": "vllm"}
                ],
                "default_model": "gpt-4o"
            }))
        }),
    );
    let listing = fetch_model_listing(&backend(spawn(app).await)).await;

    let labels: Vec<String> = listing.options().into_iter().map(|o| o.label).collect();
    assert_eq!(labels, vec!["vllm:granite", "vllm:mistral", "openai:gpt-4o"]);
    assert_eq!(listing.default_model(), Some("gpt-4o"));
}

#[tokio::test]
async fn test_list_models_non_2xx() {
    let app = Router::new().route(
        "/models",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "index still loading") }),
    );
    let err = backend(spawn(app).await).list_models().await.unwrap_err();
    assert_eq!(
        err,
        BackendError::HttpStatus {
            status: 503,
            body: "index still loading".into()
        }
    );
}

#[tokio::test]
async fn test_list_models_malformed_body() {
    let app = Router::new().route("/models", get(|| async { "<html>oops</html>" }));
    let err = backend(spawn(app).await).list_models().await.unwrap_err();
    assert!(matches!(err, BackendError::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_list_models_times_out() {
    let app = Router::new().route(
        "/models",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(serde_json::json!(["late"]))
        }),
    );
    let backend = HttpBackend::new(BackendConfig {
        url: spawn(app).await,
        models_timeout_secs: 1,
        ..BackendConfig::default()
    })
    .unwrap();

    let err = backend.list_models().await.unwrap_err();
    assert_eq!(err, BackendError::Timeout { timeout_secs: 1 });
}

#[tokio::test]
async fn test_unreachable_backend_is_unavailable() {
    // grab a free port, then close it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = backend(format!("http://{}", addr));
    let err = backend.list_models().await.unwrap_err();
    assert!(matches!(err, BackendError::Connection { .. }));

    match fetch_model_listing(&backend).await {
        ModelListing::Unavailable { reason } => assert!(reason.contains("Could not load models")),
        other => panic!("Expected Unavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_model_list_is_unavailable() {
    let app = Router::new().route("/models", get(|| async { Json(serde_json::json!([])) }));
    let listing = fetch_model_listing(&backend(spawn(app).await)).await;
    assert!(matches!(listing, ModelListing::Unavailable { .. }));
    assert!(listing.options().is_empty());
}

// --- completion streaming ---

#[tokio::test]
async fn test_stream_sse_fragments() {
    let (url, payloads) = sse_server(&[
        r#"{"content":"Hel"}"#,
        r#"{"content":"lo"}"#,
        r#"{"content":" world"}"#,
        "[DONE]",
    ])
    .await;

    let stream = backend(url).stream_completion(request("hi")).await.unwrap();
    let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
    assert_eq!(fragments, vec!["Hel", "lo", " world"]);

    let payloads = payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["model"], "granite");
    assert_eq!(payloads[0]["message"], "hi");
    assert_eq!(payloads[0]["history"][0]["role"], "user");
    assert_eq!(payloads[0]["history"][1]["text"], "answer");
}

#[tokio::test]
async fn test_stream_error_event_ends_stream() {
    let (url, _) = sse_server(&[r#"{"content":"Partial"}"#, r#"{"error":"retriever crashed"}"#]).await;

    let items: Vec<_> = backend(url)
        .stream_completion(request("q"))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok("Partial".to_string()));
    assert_eq!(
        items[1],
        Err(BackendError::Streaming {
            message: "retriever crashed".into()
        })
    );
}

#[tokio::test]
async fn test_stream_chunked_flat_payload() {
    let payloads: Payloads = Arc::default();
    let app = Router::new()
        .route(
            "/ask",
            post(
                |State(seen): State<Payloads>, Json(payload): Json<Value>| async move {
                    seen.lock().unwrap().push(payload);
                    // "é" split across two chunks
                    let chunks = vec![
                        Ok::<Bytes, std::io::Error>(Bytes::from_static(b"caf\xc3")),
                        Ok(Bytes::from_static(b"\xa9 au lait")),
                    ];
                    Body::from_stream(futures::stream::iter(chunks))
                },
            ),
        )
        .with_state(payloads.clone());

    let backend = HttpBackend::new(BackendConfig {
        url: spawn(app).await,
        completion_path: "/ask".into(),
        transport: StreamTransport::Chunked,
        payload: PayloadFormat::Flat,
        ..BackendConfig::default()
    })
    .unwrap();

    let stream = backend.stream_completion(request("coffee?")).await.unwrap();
    let text: String = stream.map(|f| f.unwrap()).collect::<Vec<_>>().await.concat();
    assert_eq!(text, "café au lait");

    let payloads = payloads.lock().unwrap();
    assert_eq!(payloads[0]["question"], "coffee?");
    assert_eq!(payloads[0]["history"], serde_json::json!(["earlier", "answer"]));
    assert_eq!(payloads[0]["model"], "granite");
}

#[tokio::test]
async fn test_stream_non_2xx_rejects_before_streaming() {
    let app = Router::new().route(
        "/rag-query/stream",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
    );
    let result = backend(spawn(app).await)
        .stream_completion(request("q"))
        .await;
    match result {
        Err(BackendError::HttpStatus { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "model not loaded");
        }
        Err(other) => panic!("Expected HttpStatus, got {:?}", other),
        Ok(_) => panic!("Expected an error"),
    }
}

// --- dispatch over HTTP ---

#[tokio::test]
async fn test_dispatch_failure_keeps_partial_and_session_usable() {
    let (url, payloads) =
        sse_server(&[r#"{"content":"Partial"}"#, r#"{"error":"connection reset"}"#]).await;
    let backend = backend(url);
    let mut session = ChatSession::new();

    let outcome = dispatch(
        &mut session,
        &backend,
        None,
        "first",
        &CancellationToken::new(),
        &NoOpCallback,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Failed { ref text, .. } if text == "Partial"));
    assert!(session.turns()[1].is_failed());

    // the failed exchange is still part of the next request's history
    dispatch(
        &mut session,
        &backend,
        None,
        "second",
        &CancellationToken::new(),
        &NoOpCallback,
    )
    .await
    .unwrap();
    let payloads = payloads.lock().unwrap();
    assert_eq!(payloads.len(), 2);
    assert!(payloads[0].get("model").is_none());
    assert_eq!(
        payloads[1]["history"],
        serde_json::json!([
            {"role": "user", "text": "first"},
            {"role": "assistant", "text": "Partial"}
        ])
    );
}
