//! Retry, timeout, and payload behavior of the resilient client against
//! a stub API server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use plaza_client::{
    ApiClient, ApiError, ClientConfig, HttpDispatcher, Payload, RequestOptions, SessionEventBus,
    TokenStore, UploadProgress, UploadSource,
};
use plaza_client_core::storage::MemoryTier;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};

#[derive(Clone)]
struct ApiStubState {
    calls: Arc<Mutex<Vec<String>>>,
    flaky_failures: Arc<AtomicUsize>,
}

struct ApiStub {
    base_url: String,
    state: ApiStubState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ApiStub {
    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    async fn calls(&self) -> Vec<String> {
        self.state.calls.lock().await.clone()
    }
}

async fn spawn_api_stub(flaky_failures: usize) -> Result<ApiStub> {
    let state = ApiStubState {
        calls: Arc::new(Mutex::new(Vec::new())),
        flaky_failures: Arc::new(AtomicUsize::new(flaky_failures)),
    };
    let app = Router::new()
        .route("/api/flaky", get(flaky))
        .route("/api/slow", get(slow))
        .route("/api/missing", get(missing))
        .route("/api/widgets", post(reject_widget))
        .route("/api/private", get(private))
        .route("/api/forbidden", get(forbidden))
        .route("/api/plain", get(plain))
        .route("/api/empty", get(empty))
        .route("/api/profile", get(profile))
        .route("/api/files", post(receive_file))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(ApiStub {
        base_url: format!("http://{addr}"),
        state,
        shutdown: Some(shutdown_tx),
    })
}

async fn record_call(calls: &Arc<Mutex<Vec<String>>>, name: &str) {
    let mut guard = calls.lock().await;
    guard.push(name.to_string());
}

async fn flaky(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/flaky").await;
    let remaining = state.flaky_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        state.flaky_failures.store(remaining - 1, Ordering::SeqCst);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "upstream unavailable"})),
        )
            .into_response();
    }
    Json(json!({"ok": true})).into_response()
}

async fn slow(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/slow").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    Json(json!({"ok": true})).into_response()
}

async fn missing(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/missing").await;
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not_found", "message": "no such page"})),
    )
        .into_response()
}

async fn reject_widget(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/widgets").await;
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({"error": "invalid_widget", "message": "name is required"})),
    )
        .into_response()
}

async fn private(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/private").await;
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized"})),
    )
        .into_response()
}

async fn forbidden(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/forbidden").await;
    (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden"}))).into_response()
}

async fn plain(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/plain").await;
    "pong".into_response()
}

async fn empty(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/empty").await;
    StatusCode::NO_CONTENT.into_response()
}

async fn profile(State(state): State<ApiStubState>) -> Response {
    record_call(&state.calls, "/api/profile").await;
    Json(json!({"id": "u-9", "displayName": "Rui", "roles": []})).into_response()
}

async fn receive_file(State(state): State<ApiStubState>, body: axum::body::Bytes) -> Response {
    record_call(&state.calls, "/api/files").await;
    Json(json!({"received": body.len()})).into_response()
}

fn build_client(base_url: &str, config: &ClientConfig) -> (ApiClient, SessionEventBus) {
    let store = TokenStore::new(Arc::new(MemoryTier::new()), Arc::new(MemoryTier::new()));
    let bus = SessionEventBus::new();
    let dispatcher = HttpDispatcher::new(base_url, store, bus.clone());
    (ApiClient::new(dispatcher, config), bus)
}

#[tokio::test]
async fn server_errors_retry_until_success() -> Result<()> {
    let stub = spawn_api_stub(2).await?;
    let config = ClientConfig {
        retry_delay: Duration::from_millis(20),
        ..ClientConfig::default()
    };
    let (api, _bus) = build_client(&stub.base_url, &config);

    let payload = api
        .get("/api/flaky", RequestOptions::default().retries(2))
        .await?;
    assert_eq!(payload.into_json()?, json!({"ok": true}));
    assert_eq!(stub.calls().await.len(), 3);

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn retries_run_out_on_a_persistent_outage() -> Result<()> {
    let stub = spawn_api_stub(10).await?;
    let config = ClientConfig {
        retry_delay: Duration::from_millis(10),
        ..ClientConfig::default()
    };
    let (api, _bus) = build_client(&stub.base_url, &config);

    let outcome = api
        .get("/api/flaky", RequestOptions::default().retries(2))
        .await;
    match outcome {
        Err(ApiError::Server { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "upstream unavailable");
        }
        other => anyhow::bail!("expected a server error, got {other:?}"),
    }
    assert_eq!(stub.calls().await.len(), 3);

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn client_errors_never_retry() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, _bus) = build_client(&stub.base_url, &ClientConfig::default());

    let outcome = api
        .get("/api/missing", RequestOptions::default().retries(3))
        .await;
    match outcome {
        Err(ApiError::Validation { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "no such page");
        }
        other => anyhow::bail!("expected a validation error, got {other:?}"),
    }
    assert_eq!(stub.calls().await.len(), 1);

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn validation_detail_comes_from_the_envelope() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, _bus) = build_client(&stub.base_url, &ClientConfig::default());

    let outcome = api
        .post("/api/widgets", json!({"name": ""}), RequestOptions::default())
        .await;
    match outcome {
        Err(ApiError::Validation { status, message }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "name is required");
        }
        other => anyhow::bail!("expected a validation error, got {other:?}"),
    }

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn timeouts_retry_and_then_surface() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let config = ClientConfig {
        retry_delay: Duration::from_millis(20),
        ..ClientConfig::default()
    };
    let (api, _bus) = build_client(&stub.base_url, &config);

    let options = RequestOptions::default()
        .retries(1)
        .timeout(Duration::from_millis(100));
    let outcome = api.get("/api/slow", options).await;
    match outcome {
        Err(ApiError::Timeout { elapsed }) => {
            assert_eq!(elapsed, Duration::from_millis(100));
        }
        other => anyhow::bail!("expected a timeout, got {other:?}"),
    }
    assert_eq!(stub.calls().await.len(), 2);

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn unauthorized_is_terminal_and_observed() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, bus) = build_client(&stub.base_url, &ClientConfig::default());
    let mut events = bus.subscribe();

    let outcome = api
        .get("/api/private", RequestOptions::default().retries(3))
        .await;
    match outcome {
        Err(ApiError::Unauthorized { url }) => assert!(url.ends_with("/api/private")),
        other => anyhow::bail!("expected an unauthorized error, got {other:?}"),
    }
    assert_eq!(stub.calls().await.len(), 1);

    let event = events.try_recv()?;
    assert_eq!(event.kind(), "unauthorized");
    assert!(events.try_recv().is_err());

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn forbidden_stays_quiet() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, bus) = build_client(&stub.base_url, &ClientConfig::default());
    let mut events = bus.subscribe();

    let outcome = api.get("/api/forbidden", RequestOptions::default()).await;
    assert!(matches!(outcome, Err(ApiError::Forbidden { .. })));
    assert!(events.try_recv().is_err());

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn payloads_follow_the_content_type() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, _bus) = build_client(&stub.base_url, &ClientConfig::default());

    let text = api.get("/api/plain", RequestOptions::default()).await?;
    assert!(matches!(text, Payload::Text(ref body) if body == "pong"));

    let nothing = api.get("/api/empty", RequestOptions::default()).await?;
    assert!(matches!(nothing, Payload::Empty));

    let json = api.get("/api/flaky", RequestOptions::default()).await?;
    assert!(matches!(json, Payload::Json(_)));

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn typed_helpers_deserialize_the_body() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, _bus) = build_client(&stub.base_url, &ClientConfig::default());

    let profile: plaza_client::UserProfile = api
        .get_json("/api/profile", RequestOptions::default())
        .await?;
    assert_eq!(profile.id, "u-9");
    assert_eq!(profile.display_name, "Rui");
    assert!(profile.roles.is_empty());

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn absolute_urls_bypass_the_base() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let config = ClientConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        ..ClientConfig::default()
    };
    let (api, _bus) = build_client(&config.base_url, &config);

    let target = format!("{}/api/plain", stub.base_url);
    let payload = api.get(&target, RequestOptions::default()).await?;
    assert!(matches!(payload, Payload::Text(ref body) if body == "pong"));

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn uploads_stream_with_monotonic_progress() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, _bus) = build_client(&stub.base_url, &ClientConfig::default());

    let content = vec![7u8; 200 * 1024];
    let ticks: Arc<std::sync::Mutex<Vec<UploadProgress>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&ticks);
    let on_progress: plaza_client::ProgressFn = Arc::new(move |progress| {
        if let Ok(mut seen) = sink.lock() {
            seen.push(progress);
        }
    });

    let payload = api
        .upload(
            "/api/files",
            UploadSource::Bytes {
                file_name: "report.pdf".to_string(),
                content: content.clone(),
            },
            RequestOptions::default(),
            Some(on_progress),
        )
        .await?;

    let received = payload.into_json()?;
    let body_len = received
        .get("received")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or_default();
    // Multipart framing adds headers and boundaries around the file.
    assert!(body_len > content.len() as u64);

    let seen = ticks.lock().map(|seen| seen.clone()).unwrap_or_default();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[0].loaded <= pair[1].loaded);
        assert!(pair[0].percent <= pair[1].percent);
    }
    let last = &seen[seen.len() - 1];
    assert_eq!(last.percent, 100);
    assert_eq!(last.loaded, content.len() as u64);

    stub.stop().await;
    Ok(())
}

#[tokio::test]
async fn an_empty_upload_still_reports_completion() -> Result<()> {
    let stub = spawn_api_stub(0).await?;
    let (api, _bus) = build_client(&stub.base_url, &ClientConfig::default());

    let ticks: Arc<std::sync::Mutex<Vec<UploadProgress>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&ticks);
    let on_progress: plaza_client::ProgressFn = Arc::new(move |progress| {
        if let Ok(mut seen) = sink.lock() {
            seen.push(progress);
        }
    });

    api.upload(
        "/api/files",
        UploadSource::Bytes {
            file_name: "empty.txt".to_string(),
            content: Vec::new(),
        },
        RequestOptions::default(),
        Some(on_progress),
    )
    .await?;

    let seen = ticks.lock().map(|seen| seen.clone()).unwrap_or_default();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].percent, 100);
    assert_eq!(seen[0].loaded, 0);

    stub.stop().await;
    Ok(())
}
