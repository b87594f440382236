#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use gridworker_api::config::ServerConfig;
use gridworker_api::logs::LogBuffer;
use gridworker_api::routes;
use gridworker_api::state::AppState;
use gridworker_backend::{BackendError, Generation, GenerationRequest, InferenceBackend};
use gridworker_core::config::{BackendKind, WorkerConfig};
use gridworker_core::job::{Job, JobResult};
use gridworker_events::status_channel;
use gridworker_grid::{GridApi, GridError, GridUser, SubmitAck};
use gridworker_worker::{ComponentFactory, Supervisor, SupervisorHandle};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

pub struct FakeBackend;

#[async_trait]
impl InferenceBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn endpoint(&self) -> &str {
        "http://backend.test"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, BackendError> {
        Ok(Generation {
            text: "ok".into(),
            prompt_tokens: 1,
            completion_tokens: 1,
        })
    }

    async fn probe_context_length(&self, _model: &str) -> Result<Option<u32>, BackendError> {
        Ok(Some(2048))
    }
}

/// Empty queue; `find_user` answers with `user`.
pub struct FakeGrid {
    pub user: Result<GridUser, GridError>,
}

#[async_trait]
impl GridApi for FakeGrid {
    async fn poll(&self) -> Result<Option<Job>, GridError> {
        Ok(None)
    }

    async fn submit(&self, _result: &JobResult) -> Result<SubmitAck, GridError> {
        Ok(SubmitAck::default())
    }

    async fn find_user(&self) -> Result<GridUser, GridError> {
        self.user.clone()
    }
}

struct FakeFactory {
    grid: Arc<FakeGrid>,
}

impl ComponentFactory for FakeFactory {
    fn backend(&self, _config: &WorkerConfig) -> Result<Arc<dyn InferenceBackend>, BackendError> {
        Ok(Arc::new(FakeBackend))
    }

    fn grid(&self, _config: &WorkerConfig) -> Result<Arc<dyn GridApi>, GridError> {
        Ok(self.grid.clone())
    }
}

pub fn healthy_user() -> Result<GridUser, GridError> {
    Ok(GridUser {
        username: "tester#42".into(),
        kudos: 1250.5,
        worker_count: 1,
    })
}

pub fn worker_config() -> WorkerConfig {
    let vars = HashMap::from([
        ("GRID_API_KEY", "test-key"),
        ("MODEL_NAME", "llama3"),
        ("GRID_MAX_THREADS", "2"),
        ("SHUTDOWN_GRACE_SECS", "1"),
    ]);
    WorkerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

pub const TEST_TOKEN: &str = "dashboard-test-token";

pub fn server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 7861,
        cors_origins: vec!["http://localhost:7861".into()],
        request_timeout_secs: 30,
        dashboard_token: Some(TEST_TOKEN.into()),
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub supervisor: SupervisorHandle,
    pub logs: LogBuffer,
}

/// Start a supervisor over fake clients and build the full router with
/// the same middleware stack `main.rs` uses.
pub async fn build_test_app(user: Result<GridUser, GridError>) -> TestApp {
    let (status, reporter, watch) = status_channel(Utc::now());
    tokio::spawn(reporter.run());

    let factory = Arc::new(FakeFactory {
        grid: Arc::new(FakeGrid { user }),
    });
    let (supervisor, handle) = Supervisor::new(worker_config(), status);
    tokio::spawn(supervisor.with_factory(factory).run(CancellationToken::new()));

    for _ in 0..200 {
        if handle.grid().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let logs = LogBuffer::default();
    let state = AppState {
        config: Arc::new(server_config()),
        supervisor: handle.clone(),
        status: watch,
        logs: logs.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:7861".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    TestApp {
        router,
        supervisor: handle,
        logs,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Requests built by the helpers below carry `TEST_TOKEN`; use `send`
/// for anything else.
pub async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(
        app,
        Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
