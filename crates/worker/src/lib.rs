//! The worker runtime: job execution, the dispatch loop and the
//! supervisor that owns configuration snapshots.

pub mod dispatch;
pub mod executor;
pub mod signal;
pub mod supervisor;

pub use dispatch::{DispatchLoop, DispatchReport, DispatchSettings};
pub use executor::{AbortReason, ExecutionOutcome, ExecutorConfig, JobExecutor};
pub use supervisor::{ComponentFactory, HttpComponents, Supervisor, SupervisorError, SupervisorHandle};
