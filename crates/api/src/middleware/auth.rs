//! Dashboard token extractor.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;

use crate::error::AppError;
use crate::state::AppState;

/// Name of the cookie a browser session carries the token in.
pub const TOKEN_COOKIE: &str = "_token";

/// Proof that the request carried the dashboard token.
///
/// Accepted from an `Authorization: Bearer <token>` header, the
/// [`TOKEN_COOKIE`] cookie, or a `?token=` query parameter. Mounted on the
/// `/api/v1` tree as a route layer; handlers do not need to name it.
#[derive(Debug, Clone, Copy)]
pub struct DashboardAuth;

impl FromRequestParts<AppState> for DashboardAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .config
            .dashboard_token
            .as_deref()
            .ok_or_else(|| AppError::Unauthorized("Dashboard token not configured".into()))?;

        let presented = bearer_token(parts)
            .or_else(|| cookie_token(parts))
            .or_else(|| query_token(parts))
            .ok_or_else(|| AppError::Unauthorized("Missing dashboard token".into()))?;

        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            tracing::warn!(path = %parts.uri.path(), "Rejected dashboard token");
            return Err(AppError::Unauthorized("Invalid dashboard token".into()));
        }
        Ok(DashboardAuth)
    }
}

// ---- private helpers ----

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn cookie_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == TOKEN_COOKIE).then(|| value.to_string())
        })
}

fn query_token(parts: &Parts) -> Option<String> {
    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
    params.remove("token")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
