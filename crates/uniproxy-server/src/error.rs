use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use uniproxy_core::UpstreamError;

use crate::config;

/// Fixed Retry-After for upstream throttling; the upstream's own header
/// range is not trusted.
const UPSTREAM_RETRY_AFTER_SECS: u64 = 60;

/// High-level API errors mapped to HTTP responses.
///
/// CORS headers are applied by the outermost middleware layer, so every one
/// of these responses carries them without cooperation here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        limit: u32,
        reset_in: u64,
        reset_at: u64,
    },

    #[error("Rate limited by upstream API")]
    UpstreamRateLimited,

    #[error("Upstream API returned {status}")]
    UpstreamStatus { status: u16, reason: String },

    #[error("Failed to fetch from upstream API: {0}")]
    UpstreamTransport(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
            // Mirror the upstream status where it is a meaningful HTTP code.
            ApiError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::RateLimited => ApiError::UpstreamRateLimited,
            UpstreamError::Status { status, reason } => ApiError::UpstreamStatus { status, reason },
            UpstreamError::Transport(message) => ApiError::UpstreamTransport(message),
        }
    }
}

impl From<Arc<UpstreamError>> for ApiError {
    fn from(err: Arc<UpstreamError>) -> Self {
        err.as_ref().clone().into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            ApiError::InvalidInput(message) => json!({ "error": message }),
            ApiError::RateLimited { reset_in, .. } => json!({
                "error": "Rate limit exceeded",
                "retryAfter": reset_in,
            }),
            ApiError::UpstreamRateLimited => json!({
                "error": "Rate limited by upstream API",
                "retryAfter": UPSTREAM_RETRY_AFTER_SECS,
            }),
            ApiError::UpstreamStatus {
                status: upstream_status,
                reason,
            } => json!({
                "error": "Upstream API error",
                "status": upstream_status,
                "reason": reason,
            }),
            ApiError::UpstreamTransport(_) => json!({
                "error": "Failed to fetch from upstream API",
            }),
            ApiError::Internal(message) => {
                if config::development_mode() {
                    json!({ "error": "Internal Server Error", "message": message })
                } else {
                    json!({ "error": "Internal Server Error" })
                }
            }
        };

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();

        match &self {
            ApiError::RateLimited {
                limit,
                reset_in,
                reset_at,
            } => {
                insert_numeric(headers, header::RETRY_AFTER, *reset_in);
                insert_numeric(headers, "x-ratelimit-limit", u64::from(*limit));
                insert_numeric(headers, "x-ratelimit-remaining", 0);
                insert_numeric(headers, "x-ratelimit-reset", *reset_at);
            }
            ApiError::UpstreamRateLimited => {
                insert_numeric(headers, header::RETRY_AFTER, UPSTREAM_RETRY_AFTER_SECS);
            }
            _ => {}
        }

        response
    }
}

fn insert_numeric<K>(headers: &mut axum::http::HeaderMap, name: K, value: u64)
where
    K: axum::http::header::IntoHeaderName,
{
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}
