//! Worker status reporting.
//!
//! - [`StatusSender`]: cheap cloneable handle producers push
//!   [`StatusEvent`]s through; sending never blocks.
//! - [`StatusReporter`]: background task folding events into the single
//!   [`WorkerStatus`](gridworker_core::status::WorkerStatus) record.
//! - [`StatusWatch`]: read side, always the latest snapshot.
//! - [`ThroughputWindow`]: sliding one-hour kudos and job rates.

pub mod bus;
pub mod reporter;
pub mod stats;

pub use bus::{StatusEvent, StatusSender};
pub use reporter::{status_channel, StatusReporter, StatusWatch};
pub use stats::ThroughputWindow;
