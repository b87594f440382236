//! The dispatch loop: polls the Grid while the pool has room, runs jobs,
//! submits results, and drains on shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use gridworker_core::backoff::{Backoff, BackoffPolicy};
use gridworker_core::capability::BackendCapability;
use gridworker_core::config::WorkerConfig;
use gridworker_core::job::{Job, JobResult};
use gridworker_events::{StatusEvent, StatusSender};
use gridworker_grid::{GridApi, GridError, SubmitAck};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::executor::{AbortReason, ExecutionOutcome, JobExecutor};

/// Consecutive poll failures, or consecutive jobs lost to an unavailable
/// backend, after which the worker reports an error.
pub const DEFAULT_UNREACHABLE_AFTER: u32 = 5;

/// Growth of the poll interval while the queue stays empty.
const IDLE_MULTIPLIER: f64 = 1.5;

// ---------------------------------------------------------------------------
// Settings and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Name advertised to the Grid, for status reporting.
    pub grid_model_name: String,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub unreachable_after: u32,
}

impl DispatchSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            grid_model_name: config.grid_model_name(),
            poll_interval: config.poll_interval,
            max_poll_interval: config.max_poll_interval,
            shutdown_grace: config.shutdown_grace,
            unreachable_after: DEFAULT_UNREACHABLE_AFTER,
        }
    }

    fn idle_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.poll_interval,
            max_delay: self.max_poll_interval.max(self.poll_interval),
            multiplier: IDLE_MULTIPLIER,
            jitter: 0.0,
        }
    }

    fn error_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.poll_interval,
            max_delay: self.max_poll_interval.max(self.poll_interval),
            ..BackoffPolicy::default()
        }
    }
}

/// What one run of the loop did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: u64,
    pub submitted: u64,
    pub aborted: u64,
    /// Results that never reached the Grid.
    pub dropped: u64,
}

// ---------------------------------------------------------------------------
// DispatchLoop
// ---------------------------------------------------------------------------

/// One operating cycle of the worker, bound to one config snapshot.
pub struct DispatchLoop {
    grid: Arc<dyn GridApi>,
    executor: Arc<JobExecutor>,
    capability: Arc<BackendCapability>,
    status: StatusSender,
    settings: DispatchSettings,
}

struct Submission {
    result: JobResult,
    outcome: Result<SubmitAck, GridError>,
}

struct RunState {
    executors: JoinSet<ExecutionOutcome>,
    submissions: JoinSet<Submission>,
    /// Cancels running jobs once the shutdown grace period is over.
    jobs_cancel: CancellationToken,
    /// Set when the Grid refused the API key.
    suspended: bool,
    /// Consecutive jobs failed with the backend unreachable.
    backend_failures: u32,
    backend_down: bool,
    backend_backoff: Backoff,
    /// No job is claimed before this instant.
    hold_until: Instant,
    report: DispatchReport,
}

impl DispatchLoop {
    pub fn new(
        grid: Arc<dyn GridApi>,
        executor: Arc<JobExecutor>,
        capability: Arc<BackendCapability>,
        status: StatusSender,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            grid,
            executor,
            capability,
            status,
            settings,
        }
    }

    /// Serve work until `shutdown` fires, then drain and return.
    pub async fn run(self, shutdown: CancellationToken) -> DispatchReport {
        let capacity = self.capability.concurrency_limit.max(1);
        let semaphore = Arc::new(Semaphore::new(capacity));
        let mut state = RunState {
            executors: JoinSet::new(),
            submissions: JoinSet::new(),
            jobs_cancel: CancellationToken::new(),
            suspended: false,
            backend_failures: 0,
            backend_down: false,
            backend_backoff: Backoff::new(self.settings.error_policy()),
            hold_until: Instant::now(),
            report: DispatchReport::default(),
        };
        let mut idle = Backoff::new(self.settings.idle_policy());
        let mut errors = Backoff::new(self.settings.error_policy());
        let mut unreachable = false;
        let mut next_poll_at = Instant::now();

        self.status.send(StatusEvent::Started {
            grid_model_name: self.settings.grid_model_name.clone(),
            backend: format!("{} @ {}", self.capability.backend_type, self.capability.endpoint),
        });
        tracing::info!(
            grid_model = %self.settings.grid_model_name,
            backend = %self.capability.backend_type,
            concurrency = capacity,
            max_context_length = self.capability.max_context_length,
            "Dispatch loop started",
        );

        loop {
            let can_poll = !state.suspended && semaphore.available_permits() > 0;
            let poll_at = next_poll_at.max(state.hold_until);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = state.executors.join_next() => {
                    self.on_execution(&mut state, joined, true);
                }
                Some(joined) = state.submissions.join_next() => {
                    self.on_submission(&mut state, joined);
                }
                _ = tokio::time::sleep_until(poll_at), if can_poll => {
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        continue;
                    };

                    // A job already handed out wins over a shutdown arriving
                    // in the same instant; it is drained like any other.
                    self.status.send(StatusEvent::PollStarted);
                    let polled = tokio::select! {
                        biased;
                        polled = self.grid.poll() => Some(polled),
                        _ = shutdown.cancelled() => None,
                    };
                    self.status.send(StatusEvent::PollFinished);
                    let Some(polled) = polled else {
                        tracing::debug!("Shutdown during poll, request abandoned");
                        break;
                    };

                    match polled {
                        Ok(Some(job)) => {
                            self.recover(&mut errors, &mut unreachable);
                            idle.reset();
                            self.admit(&mut state, job, permit);
                            next_poll_at = Instant::now();
                        }
                        Ok(None) => {
                            drop(permit);
                            self.recover(&mut errors, &mut unreachable);
                            let delay = idle.next_delay_with(0.0);
                            tracing::debug!(delay_ms = delay.as_millis() as u64, "No job available");
                            next_poll_at = Instant::now() + delay;
                        }
                        Err(e) if e.is_auth() => {
                            drop(permit);
                            self.suspend(&mut state, &e);
                        }
                        Err(e) => {
                            drop(permit);
                            let delay = errors.next_delay();
                            tracing::warn!(
                                error = %e,
                                failures = errors.failures(),
                                delay_ms = delay.as_millis() as u64,
                                "Grid poll failed, backing off",
                            );
                            if errors.failures() >= self.settings.unreachable_after && !unreachable {
                                unreachable = true;
                                self.status.send(StatusEvent::Error {
                                    message: format!("grid unreachable: {e}"),
                                });
                            }
                            next_poll_at = Instant::now() + delay;
                        }
                    }
                }
            }
        }

        self.drain(&mut state).await;
        self.status.send(StatusEvent::Stopped);

        let report = state.report;
        tracing::info!(
            claimed = report.claimed,
            submitted = report.submitted,
            aborted = report.aborted,
            dropped = report.dropped,
            "Dispatch loop stopped",
        );
        report
    }

    // ---- private helpers ----

    /// Start executing `job`. The permit is released when the task ends.
    fn admit(&self, state: &mut RunState, job: Job, permit: OwnedSemaphorePermit) {
        state.report.claimed += 1;
        tracing::info!(job_id = %job.id, max_length = job.max_length, "Job received");
        self.status.send(StatusEvent::JobClaimed {
            job_id: job.id.clone(),
        });

        let executor = Arc::clone(&self.executor);
        let cancel = state.jobs_cancel.clone();
        let job_id = job.id.clone();
        state.executors.spawn(async move {
            let _permit = permit;
            match AssertUnwindSafe(executor.execute(job, cancel)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => ExecutionOutcome::Aborted {
                    job_id,
                    reason: AbortReason::Panicked,
                },
            }
        });
    }

    /// Handle a finished executor. With `accept_results` false the job
    /// finished after the grace period and its result is discarded.
    fn on_execution(
        &self,
        state: &mut RunState,
        joined: Result<ExecutionOutcome, JoinError>,
        accept_results: bool,
    ) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Executor task failed");
                state.report.aborted += 1;
                return;
            }
        };

        match outcome {
            ExecutionOutcome::Completed(result) if accept_results => {
                self.track_backend(state, &result);
                self.status.send(StatusEvent::JobCompleted {
                    job_id: result.job_id.clone(),
                    status: result.status,
                });
                self.submit_or_drop(state, result);
            }
            ExecutionOutcome::Completed(result) => {
                tracing::warn!(job_id = %result.job_id, "Job finished after grace period, discarding result");
                state.report.aborted += 1;
                self.status.send(StatusEvent::JobAborted {
                    job_id: result.job_id,
                    reason: "shutdown grace period elapsed".into(),
                });
            }
            ExecutionOutcome::Aborted { job_id, reason } => {
                state.report.aborted += 1;
                self.status.send(StatusEvent::JobAborted {
                    job_id,
                    reason: reason.to_string(),
                });
            }
        }
    }

    fn submit_or_drop(&self, state: &mut RunState, result: JobResult) {
        if state.suspended {
            tracing::warn!(job_id = %result.job_id, "Grid authentication failed, dropping result");
            state.report.dropped += 1;
            self.status.send(StatusEvent::ResultNotSubmitted {
                job_id: result.job_id,
                reason: "grid authentication failed".into(),
            });
            return;
        }

        let grid = Arc::clone(&self.grid);
        state.submissions.spawn(async move {
            let outcome = grid.submit(&result).await;
            Submission { result, outcome }
        });
    }

    fn on_submission(&self, state: &mut RunState, joined: Result<Submission, JoinError>) {
        let Submission { result, outcome } = match joined {
            Ok(submission) => submission,
            Err(e) => {
                tracing::warn!(error = %e, "Submission abandoned");
                state.report.dropped += 1;
                return;
            }
        };

        match outcome {
            Ok(ack) => {
                state.report.submitted += 1;
                if result.is_success() {
                    let secs = result.duration.as_secs_f64();
                    let tps = if secs > 0.0 {
                        f64::from(result.completion_tokens) / secs
                    } else {
                        0.0
                    };
                    tracing::info!(
                        job_id = %result.job_id,
                        tokens = result.completion_tokens,
                        tokens_per_sec = (tps * 10.0).round() / 10.0,
                        reward = ack.reward,
                        "Job complete",
                    );
                } else {
                    tracing::warn!(
                        job_id = %result.job_id,
                        status = ?result.status,
                        detail = result.error_detail.as_deref().unwrap_or_default(),
                        "Failed job reported to grid",
                    );
                }
                self.status.send(StatusEvent::ResultSubmitted {
                    job_id: result.job_id,
                    status: result.status,
                    reward: ack.reward,
                    tokens: u64::from(result.completion_tokens),
                    detail: result.error_detail,
                });
            }
            Err(GridError::DuplicateSubmit(job_id)) => {
                self.status.send(StatusEvent::Warning {
                    message: format!("duplicate submit for job {job_id}"),
                });
            }
            Err(e) => {
                if e.is_auth() {
                    self.suspend(state, &e);
                }
                tracing::error!(job_id = %result.job_id, error = %e, "Submit failed, result abandoned");
                state.report.dropped += 1;
                self.status.send(StatusEvent::ResultNotSubmitted {
                    job_id: result.job_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn suspend(&self, state: &mut RunState, error: &GridError) {
        if state.suspended {
            return;
        }
        state.suspended = true;
        tracing::error!(error = %error, "Grid refused the API key, polling suspended until reconfigured");
        self.status.send(StatusEvent::Error {
            message: format!("grid authentication failed: {error}"),
        });
    }

    /// Count jobs lost to an unavailable backend. Past the threshold the
    /// worker reports an error and stops claiming for a backoff delay.
    fn track_backend(&self, state: &mut RunState, result: &JobResult) {
        if !result.backend_unavailable {
            state.backend_failures = 0;
            state.backend_backoff.reset();
            state.hold_until = Instant::now();
            if state.backend_down {
                state.backend_down = false;
                tracing::info!("Backend reachable again");
                self.status.send(StatusEvent::Recovered);
            }
            return;
        }

        state.backend_failures += 1;
        if state.backend_failures < self.settings.unreachable_after {
            return;
        }
        let delay = state.backend_backoff.next_delay();
        state.hold_until = Instant::now() + delay;
        tracing::warn!(
            failures = state.backend_failures,
            delay_ms = delay.as_millis() as u64,
            "Backend unavailable, holding off new jobs",
        );
        if !state.backend_down {
            state.backend_down = true;
            let detail = result.error_detail.as_deref().unwrap_or("no response");
            self.status.send(StatusEvent::Error {
                message: format!("backend unavailable: {detail}"),
            });
        }
    }

    fn recover(&self, errors: &mut Backoff, unreachable: &mut bool) {
        errors.reset();
        if *unreachable {
            *unreachable = false;
            tracing::info!("Grid reachable again");
            self.status.send(StatusEvent::Recovered);
        }
    }

    /// Wait for in-flight work within the grace period, then cancel
    /// whatever is left.
    async fn drain(&self, state: &mut RunState) {
        tracing::info!(
            in_flight = state.executors.len(),
            pending_submissions = state.submissions.len(),
            grace_secs = self.settings.shutdown_grace.as_secs(),
            "Dispatch loop draining",
        );

        let grace = tokio::time::sleep(self.settings.shutdown_grace);
        tokio::pin!(grace);
        while !state.executors.is_empty() || !state.submissions.is_empty() {
            tokio::select! {
                biased;
                Some(joined) = state.executors.join_next() => {
                    self.on_execution(state, joined, true);
                }
                Some(joined) = state.submissions.join_next() => {
                    self.on_submission(state, joined);
                }
                _ = &mut grace => break,
            }
        }

        if !state.executors.is_empty() {
            tracing::warn!(remaining = state.executors.len(), "Grace period elapsed, cancelling jobs");
            state.jobs_cancel.cancel();
            while let Some(joined) = state.executors.join_next().await {
                self.on_execution(state, joined, false);
            }
        }

        if !state.submissions.is_empty() {
            tracing::warn!(remaining = state.submissions.len(), "Grace period elapsed, abandoning submissions");
            state.submissions.abort_all();
            while let Some(joined) = state.submissions.join_next().await {
                self.on_submission(state, joined);
            }
        }
    }
}
