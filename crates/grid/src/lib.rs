//! Client for the Grid job-distribution API.
//!
//! [`GridApi`] is the seam the dispatch loop talks to; [`HttpGridClient`]
//! is the production implementation over the Grid's `/v2` REST endpoints.

pub mod client;
pub mod error;
pub mod http;
pub mod ledger;
pub mod messages;

pub use client::{GridApi, GridUser, SubmitAck};
pub use error::GridError;
pub use http::HttpGridClient;
