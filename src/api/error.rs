//! HTTP error taxonomy.
//!
//! Every non-200 response carries `{ "error": kind, "detail": message }` so
//! the dashboard can render failures without sniffing status text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Storage(anyhow::Error),
    /// Reserved for pass-through endpoints that opt out of the
    /// empty-result recovery.
    #[allow(dead_code)]
    Upstream(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Storage(_) => "StorageFailure",
            ApiError::Upstream(_) => "UpstreamUnavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::BadRequest(d)
            | ApiError::Unauthorized(d)
            | ApiError::NotFound(d)
            | ApiError::Upstream(d) => d.clone(),
            ApiError::Storage(e) => format!("{:#}", e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.detail();
        if status.is_server_error() {
            error!(kind = self.kind(), detail = %detail, "Request failed");
        }
        (
            status,
            Json(json!({ "error": self.kind(), "detail": detail })),
        )
            .into_response()
    }
}

/// Store failures surface as StorageFailure 5xx.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Storage(err)
    }
}
