//! Status events and the producer handle.

use gridworker_core::job::JobStatus;
use gridworker_core::types::JobId;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// Something that happened to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// A dispatch loop started serving work.
    Started {
        grid_model_name: String,
        backend: String,
    },
    /// A poll request was sent.
    PollStarted,
    /// The poll answered, with or without a job.
    PollFinished,
    /// A job was admitted to the pool.
    JobClaimed { job_id: JobId },
    /// The executor produced a result for the job.
    JobCompleted { job_id: JobId, status: JobStatus },
    /// The job was cancelled or went stale; nothing will be submitted.
    JobAborted { job_id: JobId, reason: String },
    /// The Grid accepted the job's result.
    ResultSubmitted {
        job_id: JobId,
        status: JobStatus,
        reward: f64,
        tokens: u64,
        /// Error detail of a failed job.
        detail: Option<String>,
    },
    /// The job's result never reached the Grid.
    ResultNotSubmitted { job_id: JobId, reason: String },
    /// Anomaly worth counting that does not change the state.
    Warning { message: String },
    /// The worker cannot make progress until something changes.
    Error { message: String },
    /// The condition behind the last `Error` has cleared.
    Recovered,
    /// The dispatch loop stopped.
    Stopped,
}

// ---------------------------------------------------------------------------
// StatusSender
// ---------------------------------------------------------------------------

/// Producer side of the status channel.
#[derive(Debug, Clone)]
pub struct StatusSender {
    sender: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusSender {
    pub(crate) fn new(sender: mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self { sender }
    }

    /// A sender whose events go nowhere.
    pub fn disconnected() -> Self {
        let (sender, _) = mpsc::unbounded_channel();
        Self { sender }
    }

    /// Push an event to the reporter.
    ///
    /// Events sent after the reporter stopped are dropped.
    pub fn send(&self, event: StatusEvent) {
        // A send error only means the reporter is gone.
        let _ = self.sender.send(event);
    }
}
