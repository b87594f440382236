//! Local dashboard API for the grid inference worker.
//!
//! Exposes config, state, error handling and routes so integration tests
//! and the binary entrypoint can both build the same router.

pub mod config;
pub mod error;
pub mod handlers;
pub mod logs;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod state;
