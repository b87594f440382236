//! Shared domain model for the grid inference worker.
//!
//! Everything here is pure data and pure functions: jobs and results, the
//! configuration snapshot, backend capability, the worker status record,
//! the error taxonomy, retry backoff and prompt shaping. No I/O.

pub mod backoff;
pub mod capability;
pub mod config;
pub mod error;
pub mod job;
pub mod prompt;
pub mod status;
pub mod types;
