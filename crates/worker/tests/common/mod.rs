#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gridworker_backend::{BackendError, Generation, GenerationRequest, InferenceBackend};
use gridworker_core::capability::BackendCapability;
use gridworker_core::config::{BackendKind, WorkerConfig};
use gridworker_core::job::{Job, JobResult, SamplingParams};
use gridworker_events::{status_channel, StatusWatch};
use gridworker_grid::{GridApi, GridError, GridUser, SubmitAck};
use gridworker_worker::{
    ComponentFactory, DispatchLoop, DispatchReport, DispatchSettings, ExecutorConfig, JobExecutor,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn job(id: &str) -> Job {
    Job {
        id: id.to_string(),
        prompt: format!("prompt for {id}"),
        sampling: SamplingParams::default(),
        max_length: 80,
        max_context_length: 4096,
        model_name: "grid/mock-model".to_string(),
        nsfw_allowed: true,
        claimed_at: Utc::now(),
    }
}

pub fn capability(concurrency_limit: usize) -> BackendCapability {
    BackendCapability {
        backend_type: BackendKind::Ollama,
        endpoint: "http://backend.test".to_string(),
        max_context_length: 4096,
        concurrency_limit,
    }
}

/// Millisecond retry delays, generous deadline.
pub fn fast_executor() -> ExecutorConfig {
    ExecutorConfig {
        max_attempts: 5,
        retry_delay: Duration::from_millis(10),
        rate_limit_delay: Duration::from_millis(20),
        base_deadline: Duration::from_secs(600),
        secs_per_token: 0.0,
    }
}

pub fn settings(grace: Duration) -> DispatchSettings {
    DispatchSettings {
        grid_model_name: "grid/mock-model".to_string(),
        poll_interval: Duration::from_millis(10),
        max_poll_interval: Duration::from_millis(100),
        shutdown_grace: grace,
        unreachable_after: 5,
    }
}

pub fn worker_config() -> WorkerConfig {
    let vars = HashMap::from([
        ("GRID_API_KEY", "test-key"),
        ("MODEL_NAME", "mock-model"),
        ("GRID_MAX_THREADS", "2"),
        ("SHUTDOWN_GRACE_SECS", "1"),
    ]);
    WorkerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

/// Poll `cond` every 10ms until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

pub struct MockBackend {
    delay: Duration,
    script: Mutex<VecDeque<Result<Generation, BackendError>>>,
    context: Option<u32>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockBackend {
    /// Every call takes `delay` and, once the script is exhausted,
    /// succeeds with a canned reply.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            script: Mutex::new(VecDeque::new()),
            context: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_script(self, script: Vec<Result<Generation, BackendError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn with_context(mut self, context: u32) -> Self {
        self.context = Some(context);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

pub fn generation(text: &str) -> Generation {
    Generation {
        text: text.to_string(),
        prompt_tokens: 5,
        completion_tokens: 10,
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn endpoint(&self) -> &str {
        "http://backend.test"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        tokio::time::sleep(self.delay).await;
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(generation(&format!("reply to {}", request.prompt))))
    }

    async fn probe_context_length(&self, _model: &str) -> Result<Option<u32>, BackendError> {
        Ok(self.context)
    }
}

// ---------------------------------------------------------------------------
// MockGrid
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockGrid {
    polls_script: Mutex<VecDeque<Result<Option<Job>, GridError>>>,
    submits: Mutex<Vec<JobResult>>,
    polls: AtomicUsize,
    poll_delay: Duration,
    submit_delay: Duration,
}

impl MockGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(ids: &[&str]) -> Self {
        let grid = Self::new();
        for id in ids {
            grid.push(Ok(Some(job(id))));
        }
        grid
    }

    /// Every poll takes `delay` before answering.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Every submit takes `delay`; the result is recorded once it ends.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    /// Queue the answer to a future poll. An empty script means an empty queue.
    pub fn push(&self, answer: Result<Option<Job>, GridError>) {
        self.polls_script.lock().unwrap().push_back(answer);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<JobResult> {
        self.submits.lock().unwrap().clone()
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted().into_iter().map(|r| r.job_id).collect()
    }
}

#[async_trait]
impl GridApi for MockGrid {
    async fn poll(&self) -> Result<Option<Job>, GridError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        self.polls_script.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn submit(&self, result: &JobResult) -> Result<SubmitAck, GridError> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        self.submits.lock().unwrap().push(result.clone());
        Ok(SubmitAck { reward: 2.0 })
    }

    async fn find_user(&self) -> Result<GridUser, GridError> {
        Ok(GridUser {
            username: "mock#1".to_string(),
            kudos: 10.0,
            worker_count: 1,
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatch harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub grid: Arc<MockGrid>,
    pub backend: Arc<MockBackend>,
    pub watch: StatusWatch,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<DispatchReport>,
}

impl Harness {
    pub async fn stop(self) -> DispatchReport {
        self.shutdown.cancel();
        self.task.await.unwrap()
    }
}

pub fn spawn_loop(
    grid: MockGrid,
    backend: MockBackend,
    concurrency: usize,
    executor_config: ExecutorConfig,
    grace: Duration,
) -> Harness {
    spawn_loop_with(grid, backend, concurrency, executor_config, settings(grace))
}

pub fn spawn_loop_with(
    grid: MockGrid,
    backend: MockBackend,
    concurrency: usize,
    executor_config: ExecutorConfig,
    settings: DispatchSettings,
) -> Harness {
    let grid = Arc::new(grid);
    let backend = Arc::new(backend);
    let (status, reporter, watch) = status_channel(Utc::now());
    tokio::spawn(reporter.run());

    let capability = Arc::new(capability(concurrency));
    let executor = Arc::new(JobExecutor::new(
        backend.clone(),
        Arc::clone(&capability),
        "mock-model".to_string(),
        executor_config,
    ));
    let dispatch = DispatchLoop::new(
        grid.clone(),
        executor,
        capability,
        status,
        settings,
    );

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(dispatch.run(shutdown.clone()));
    Harness {
        grid,
        backend,
        watch,
        shutdown,
        task,
    }
}

// ---------------------------------------------------------------------------
// MockFactory
// ---------------------------------------------------------------------------

/// Hands out the same mock clients for every snapshot and records the
/// snapshots it was asked to build for.
pub struct MockFactory {
    pub grid: Arc<MockGrid>,
    pub backend: Arc<MockBackend>,
    pub built: Mutex<Vec<WorkerConfig>>,
}

impl MockFactory {
    pub fn new(grid: MockGrid, backend: MockBackend) -> Self {
        Self {
            grid: Arc::new(grid),
            backend: Arc::new(backend),
            built: Mutex::new(Vec::new()),
        }
    }

    pub fn builds(&self) -> usize {
        self.built.lock().unwrap().len()
    }
}

impl ComponentFactory for MockFactory {
    fn backend(&self, config: &WorkerConfig) -> Result<Arc<dyn InferenceBackend>, BackendError> {
        self.built.lock().unwrap().push(config.clone());
        Ok(self.backend.clone())
    }

    fn grid(&self, _config: &WorkerConfig) -> Result<Arc<dyn GridApi>, GridError> {
        Ok(self.grid.clone())
    }
}
