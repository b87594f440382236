use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::Router;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridworker_api::config::{generate_token, ServerConfig};
use gridworker_api::logs::LogBuffer;
use gridworker_api::routes;
use gridworker_api::state::AppState;
use gridworker_core::config::WorkerConfig;
use gridworker_events::status_channel;
use gridworker_worker::signal::shutdown_signal;
use gridworker_worker::Supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let logs = LogBuffer::default();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gridworker_api=info,gridworker_worker=info,gridworker_grid=info,gridworker_backend=info,tower_http=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(logs.layer())
        .init();

    // --- Configuration ---
    let mut server_config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid dashboard configuration");
            return ExitCode::FAILURE;
        }
    };
    let worker_config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            return ExitCode::FAILURE;
        }
    };
    if server_config.dashboard_token.is_none() {
        let token = generate_token();
        println!("DASHBOARD_TOKEN not set, generated one for this run: {token}");
        tracing::warn!("DASHBOARD_TOKEN not set, using a generated token");
        server_config.dashboard_token = Some(token);
    }
    tracing::info!(
        host = %server_config.host,
        port = server_config.port,
        worker = %worker_config.worker_name,
        grid_model = %worker_config.grid_model_name(),
        "Loaded configuration",
    );

    // --- CORS ---
    let cors = match build_cors_layer(&server_config) {
        Ok(cors) => cors,
        Err(origin) => {
            tracing::error!(%origin, "Invalid CORS origin");
            return ExitCode::FAILURE;
        }
    };

    // --- Status reporter ---
    let (status, reporter, watch) = status_channel(Utc::now());
    let reporter_handle = tokio::spawn(reporter.run());

    // --- Worker supervisor ---
    // Cancelled by a signal, or by the supervisor itself after a dashboard
    // shutdown, so the HTTP server follows the worker down.
    let shutdown = CancellationToken::new();
    let (supervisor, handle) = Supervisor::new(worker_config, status);
    let supervisor_token = shutdown.clone();
    let supervisor_handle = tokio::spawn(async move {
        let result = supervisor.run(supervisor_token.clone()).await;
        supervisor_token.cancel();
        result
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    // --- App state ---
    let state = AppState {
        config: Arc::new(server_config.clone()),
        supervisor: handle,
        status: watch,
        logs,
    };

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes(state.clone()))
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server_config.request_timeout_secs),
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

    // --- Start server ---
    let addr = match server_config.host.parse() {
        Ok(ip) => SocketAddr::new(ip, server_config.port),
        Err(e) => {
            tracing::error!(host = %server_config.host, error = %e, "Invalid HOST address");
            shutdown.cancel();
            return ExitCode::FAILURE;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind dashboard address");
            shutdown.cancel();
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Dashboard listening");

    let server_token = shutdown.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Server error");
        shutdown.cancel();
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, waiting for the worker to drain");
    let result = match supervisor_handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Supervisor task failed");
            return ExitCode::FAILURE;
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), reporter_handle).await;

    match result {
        Ok(()) => {
            tracing::info!("Graceful shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Returns the first origin that is not a valid header value.
fn build_cors_layer(config: &ServerConfig) -> Result<CorsLayer, String> {
    let origins = config
        .cors_origins
        .iter()
        .map(|o| o.parse::<HeaderValue>().map_err(|_| o.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(3600)))
}
