//! Ingest authentication.
//!
//! A single shared secret in `X-INGEST-TOKEN`, checked only when
//! `INGEST_TOKEN` is configured. The read side stays open: the dashboard
//! never writes.

use crate::api::{error::ApiError, AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

pub const INGEST_TOKEN_HEADER: &str = "X-INGEST-TOKEN";

pub async fn require_ingest_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.config.ingest_token.as_deref() {
        let provided = req
            .headers()
            .get(INGEST_TOKEN_HEADER)
            .and_then(|h| h.to_str().ok());
        if provided != Some(expected) {
            return Err(ApiError::Unauthorized(format!(
                "missing or invalid {}",
                INGEST_TOKEN_HEADER
            )));
        }
    }
    Ok(next.run(req).await)
}
