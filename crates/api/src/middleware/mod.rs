//! Request guards for the dashboard API.
//!
//! - [`auth::DashboardAuth`] -- Requires the dashboard token.

pub mod auth;
