//! Folds [`StatusEvent`]s into the published [`WorkerStatus`].
//!
//! One task owns the record. Producers talk to it only through
//! [`StatusSender`]; readers only see snapshots through [`StatusWatch`].

use std::time::Duration;

use chrono::Utc;
use gridworker_core::job::JobStatus;
use gridworker_core::status::{WorkerState, WorkerStatus};
use gridworker_core::types::Timestamp;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::bus::{StatusEvent, StatusSender};
use crate::stats::ThroughputWindow;

/// How often uptime and rates are refreshed without new events.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Create a connected sender, reporter and watch.
///
/// The reporter must be driven with [`StatusReporter::run`].
pub fn status_channel(started_at: Timestamp) -> (StatusSender, StatusReporter, StatusWatch) {
    let (tx, rx) = mpsc::unbounded_channel();
    let fold = StatusFold::new(started_at);
    let (publisher, receiver) = watch::channel(fold.snapshot(started_at));
    let reporter = StatusReporter {
        receiver: rx,
        fold,
        publisher,
    };
    (StatusSender::new(tx), reporter, StatusWatch { receiver })
}

// ---------------------------------------------------------------------------
// StatusReporter
// ---------------------------------------------------------------------------

/// Background task owning the [`WorkerStatus`] record.
pub struct StatusReporter {
    receiver: mpsc::UnboundedReceiver<StatusEvent>,
    fold: StatusFold,
    publisher: watch::Sender<WorkerStatus>,
}

impl StatusReporter {
    /// Run until every [`StatusSender`] has been dropped.
    pub async fn run(mut self) {
        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(event) => self.fold.apply(event, Utc::now()),
                    None => {
                        tracing::info!("Status channel closed, reporter shutting down");
                        break;
                    }
                },
                _ = refresh.tick() => {}
            }
            self.publisher.send_replace(self.fold.snapshot(Utc::now()));
        }
    }
}

// ---------------------------------------------------------------------------
// StatusWatch
// ---------------------------------------------------------------------------

/// Read side of the status record. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusWatch {
    receiver: watch::Receiver<WorkerStatus>,
}

impl StatusWatch {
    /// Latest published status with uptime brought up to date.
    pub fn snapshot(&self) -> WorkerStatus {
        let mut status = self.receiver.borrow().clone();
        status.uptime_seconds = (Utc::now() - status.started_at).num_seconds();
        status
    }

    /// Receiver that is notified on every publication.
    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.receiver.clone()
    }
}

// ---------------------------------------------------------------------------
// StatusFold
// ---------------------------------------------------------------------------

struct StatusFold {
    status: WorkerStatus,
    window: ThroughputWindow,
    running: bool,
    polling: bool,
    error: bool,
}

impl StatusFold {
    fn new(started_at: Timestamp) -> Self {
        Self {
            status: WorkerStatus::new(started_at),
            window: ThroughputWindow::new(),
            running: false,
            polling: false,
            error: false,
        }
    }

    fn apply(&mut self, event: StatusEvent, now: Timestamp) {
        let status = &mut self.status;
        match event {
            StatusEvent::Started {
                grid_model_name,
                backend,
            } => {
                self.running = true;
                self.error = false;
                status.grid_model_name = Some(grid_model_name);
                status.backend = Some(backend);
            }
            StatusEvent::PollStarted => {
                self.polling = true;
                status.last_poll_at = Some(now);
            }
            StatusEvent::PollFinished => self.polling = false,
            StatusEvent::JobClaimed { job_id } => {
                status.active_job_ids.insert(job_id);
            }
            StatusEvent::JobCompleted { job_id, .. } => {
                status.active_job_ids.remove(&job_id);
            }
            StatusEvent::JobAborted { job_id, reason } => {
                tracing::debug!(job_id = %job_id, reason = %reason, "Job aborted");
                status.active_job_ids.remove(&job_id);
                status.jobs_aborted += 1;
            }
            StatusEvent::ResultSubmitted {
                status: job_status,
                reward,
                tokens,
                detail,
                ..
            } => {
                if job_status == JobStatus::Success {
                    status.jobs_completed += 1;
                    self.window.record(reward, tokens, now);
                } else {
                    status.jobs_failed += 1;
                    // An open error condition keeps its message.
                    if !self.error && detail.is_some() {
                        status.last_error = detail;
                    }
                }
            }
            StatusEvent::ResultNotSubmitted { reason, .. } => {
                status.jobs_failed += 1;
                status.last_error = Some(reason);
            }
            StatusEvent::Warning { .. } => status.warnings += 1,
            StatusEvent::Error { message } => {
                self.error = true;
                status.last_error = Some(message);
            }
            StatusEvent::Recovered => self.error = false,
            StatusEvent::Stopped => {
                self.running = false;
                self.polling = false;
                status.active_job_ids.clear();
            }
        }
        self.status.state = self.derive_state();
    }

    fn derive_state(&self) -> WorkerState {
        if self.error {
            WorkerState::Error
        } else if !self.running {
            WorkerState::Stopped
        } else if !self.status.active_job_ids.is_empty() {
            WorkerState::Busy
        } else if self.polling {
            WorkerState::Polling
        } else {
            WorkerState::Idle
        }
    }

    fn snapshot(&self, now: Timestamp) -> WorkerStatus {
        let mut status = self.status.clone();
        status.uptime_seconds = (now - status.started_at).num_seconds();
        status.throughput = self.window.summary(now);
        status
    }
}
