use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use uniproxy_core::metrics;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::server::AppState;

// =============================================================================
// CORS
// =============================================================================

/// Resolved CORS policy.
///
/// Every response carries `Access-Control-Allow-Origin`: the request origin
/// when it is allowed, otherwise the first configured entry. Browsers then
/// reject disallowed cross-origin reads themselves instead of silently
/// discarding error responses that lack the header.
#[derive(Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
    development: bool,
}

impl CorsPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            allowed_origins: cfg.allowed_origins.clone(),
            development: cfg.environment.is_development(),
        }
    }

    /// Pick the origin to echo for this request.
    pub fn resolve(&self, origin: Option<&str>) -> String {
        if let Some(origin) = origin {
            if self.allowed_origins.iter().any(|o| o == origin) {
                return origin.to_string();
            }
            if self.development && is_local_origin(origin) {
                return origin.to_string();
            }
        }
        self.allowed_origins
            .first()
            .cloned()
            .unwrap_or_else(|| "*".to_string())
    }
}

fn is_local_origin(origin: &str) -> bool {
    origin == "http://localhost"
        || origin == "http://127.0.0.1"
        || origin.starts_with("http://localhost:")
        || origin.starts_with("http://127.0.0.1:")
}

/// CORS middleware. Outermost layer: answers preflights with 204 and stamps
/// the CORS headers onto every other response, including errors.
pub async fn cors(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let allow_origin = state.cors.resolve(origin.as_deref());

    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response, &allow_origin, true);
        return response;
    }

    let mut response = next.run(req).await;
    apply_cors_headers(&mut response, &allow_origin, false);
    response
}

fn apply_cors_headers(response: &mut Response, allow_origin: &str, preflight: bool) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    if preflight {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Accept"),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static("86400"),
        );
    }
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Resolve the client identifier from proxy-provided headers.
///
/// Values are accepted verbatim; the limiter does not parse addresses.
pub fn client_identifier(headers: &axum::http::HeaderMap) -> String {
    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return ip.to_string();
    }
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }
    "unknown".to_string()
}

/// Rate-limit gate for the API routes.
///
/// Admitted requests get the `X-RateLimit-*` headers stamped on the
/// response; denials short-circuit with 429 and `Retry-After`.
pub async fn rate_limit(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if !req.uri().path().starts_with("/api/") {
        return next.run(req).await;
    }

    let identifier = client_identifier(req.headers());
    let decision = state.limiter.check(&identifier);

    if !decision.allowed {
        metrics::record_rate_limited();
        tracing::debug!(identifier = %identifier, "rate limit exceeded");
        return ApiError::RateLimited {
            limit: decision.limit,
            reset_in: decision.reset_in,
            reset_at: decision.reset_at,
        }
        .into_response();
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    insert_header(headers, "x-ratelimit-limit", decision.limit.into());
    insert_header(headers, "x-ratelimit-remaining", decision.remaining.into());
    insert_header(headers, "x-ratelimit-reset", decision.reset_at);
    response
}

fn insert_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

// =============================================================================
// Request IDs
// =============================================================================

// Middleware that ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        });

    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}
