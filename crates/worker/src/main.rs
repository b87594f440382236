use std::process::ExitCode;

use chrono::Utc;
use gridworker_core::config::WorkerConfig;
use gridworker_events::status_channel;
use gridworker_worker::signal::shutdown_signal;
use gridworker_worker::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headless worker: no dashboard, stops on SIGINT/SIGTERM.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridworker_worker=info,gridworker_grid=info,gridworker_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid worker configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        worker = %config.worker_name,
        grid_model = %config.grid_model_name(),
        backend = %config.backend_kind,
        backend_url = %config.backend_url,
        "Worker starting",
    );

    let (status, reporter, _watch) = status_channel(Utc::now());
    let reporter_handle = tokio::spawn(reporter.run());

    let (supervisor, handle) = Supervisor::new(config, status);
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let result = supervisor.run(shutdown).await;
    // The handle keeps the command channel open until the supervisor is done.
    drop(handle);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), reporter_handle).await;

    match result {
        Ok(()) => {
            tracing::info!("Worker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}
