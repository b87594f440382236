use std::collections::HashMap;
use std::time::Duration;

use axum::Router;
use gridworker_core::backoff::BackoffPolicy;
use gridworker_core::config::WorkerConfig;
use gridworker_grid::HttpGridClient;

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn test_config(grid_url: &str) -> WorkerConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("GRID_API_URL", grid_url.to_string()),
        ("GRID_API_KEY", "test-key".to_string()),
        ("GRID_WORKER_NAME", "test-worker".to_string()),
        ("MODEL_NAME", "llama3".to_string()),
        ("GRID_MAX_LENGTH", "512".to_string()),
        ("GRID_MAX_CONTEXT_LENGTH", "2048".to_string()),
        ("GRID_MAX_THREADS", "2".to_string()),
        ("WALLET_ADDRESS", "0xabc".to_string()),
    ]);
    WorkerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Client with millisecond submit retries.
pub fn fast_client(grid_url: &str) -> HttpGridClient {
    let policy = BackoffPolicy {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: 0.0,
    };
    HttpGridClient::new(&test_config(grid_url))
        .unwrap()
        .with_submit_retry(policy, 3)
}
