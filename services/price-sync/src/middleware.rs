//! Shared-secret check for automation endpoints
//!
//! Callers send the secret in `X-API-KEY`. Without a configured secret every
//! request is refused.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !key_matches(state.api_key.as_deref(), provided) {
        tracing::warn!("Rejected automation request with missing or invalid API key");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}

fn key_matches(expected: Option<&str>, provided: Option<&str>) -> bool {
    match (expected, provided) {
        (Some(expected), Some(provided)) if !expected.is_empty() => {
            provided.as_bytes().ct_eq(expected.as_bytes()).into()
        }
        _ => false,
    }
}
