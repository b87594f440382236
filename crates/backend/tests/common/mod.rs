use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use gridworker_core::job::SamplingParams;
use gridworker_backend::GenerationRequest;

/// Request timeout used by backends under test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Shared slot the fake server writes the last received body into.
pub type Captured = Arc<Mutex<Option<serde_json::Value>>>;

pub fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        model: "llama3".to_string(),
        prompt: prompt.to_string(),
        sampling: SamplingParams {
            temperature: Some(0.7),
            ..SamplingParams::default()
        },
        max_length: 80,
        context_length: 4096,
    }
}
