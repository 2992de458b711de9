use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use uniproxy_core::{CacheLookup, CachePolicy, CacheSource, keys};

use crate::error::ApiError;
use crate::server::AppState;
use crate::validation;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let body = json!({
        "name": "uniproxy",
        "status": "ok",
        "environment": state.config.environment.as_str(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn metrics() -> impl IntoResponse {
    match crate::observability::render_metrics() {
        Some(text) => (StatusCode::OK, text).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "metrics not initialized" })),
        )
            .into_response(),
    }
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}

/// Cached proxy for `GET /api/v2/aggregated/{datacenter}/{itemIds}`.
pub async fn aggregated(
    State(state): State<AppState>,
    Path((datacenter, item_ids)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    if !validation::is_known_datacenter(&datacenter) {
        return Err(ApiError::invalid_input(format!(
            "unknown datacenter or world: {datacenter}"
        )));
    }
    let ids = validation::parse_item_ids(&item_ids)?;

    let policy = CachePolicy::AGGREGATED;
    let key = keys::aggregated_key(policy.key_prefix, &datacenter, &ids);

    let normalized = keys::normalize_item_ids(&ids);
    let upstream_path = format!(
        "/api/v2/aggregated/{}/{}",
        datacenter.to_ascii_lowercase(),
        keys::join_ids(&normalized)
    );

    let upstream = state.upstream.clone();
    let lookup = state
        .cache
        .get_or_fetch(&key, policy, move || async move {
            upstream.fetch_json(&upstream_path).await
        })
        .await?;

    Ok(cached_response(lookup, policy))
}

/// Cached proxy for `GET /api/v2/data-centers`.
pub async fn data_centers(State(state): State<AppState>) -> Result<Response, ApiError> {
    proxy_list(state, CachePolicy::DATA_CENTERS, "/api/v2/data-centers").await
}

/// Cached proxy for `GET /api/v2/worlds`.
pub async fn worlds(State(state): State<AppState>) -> Result<Response, ApiError> {
    proxy_list(state, CachePolicy::WORLDS, "/api/v2/worlds").await
}

async fn proxy_list(
    state: AppState,
    policy: CachePolicy,
    upstream_path: &'static str,
) -> Result<Response, ApiError> {
    let key = keys::list_key(policy.key_prefix);
    let upstream = state.upstream.clone();
    let lookup = state
        .cache
        .get_or_fetch(&key, policy, move || async move {
            upstream.fetch_json(upstream_path).await
        })
        .await?;

    Ok(cached_response(lookup, policy))
}

/// Build a 200 response with the cache-debug headers.
fn cached_response(lookup: CacheLookup, policy: CachePolicy) -> Response {
    let cache_status = match lookup.source {
        CacheSource::Upstream => "MISS",
        CacheSource::Edge | CacheSource::Slow => "HIT",
    };

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, lookup.payload.content_type.as_str())
        .header("x-cache", cache_status)
        .header("x-cache-source", lookup.source.as_str())
        .header("x-cache-stale", if lookup.stale { "true" } else { "false" })
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", policy.edge_ttl.as_secs()),
        );

    match builder.body(Body::from(lookup.payload.body.as_ref().clone())) {
        Ok(response) => response,
        Err(e) => ApiError::internal(format!("failed to build response: {e}")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uniproxy_core::CachedPayload;

    fn lookup(source: CacheSource, stale: bool) -> CacheLookup {
        CacheLookup {
            payload: CachedPayload {
                body: Arc::new(b"{\"items\":[]}".to_vec()),
                content_type: "application/json".to_string(),
            },
            source,
            stale,
        }
    }

    #[test]
    fn miss_response_headers() {
        let response = cached_response(lookup(CacheSource::Upstream, false), CachePolicy::AGGREGATED);
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("x-cache").unwrap(), "MISS");
        assert_eq!(headers.get("x-cache-source").unwrap(), "upstream");
        assert_eq!(headers.get("x-cache-stale").unwrap(), "false");
        assert_eq!(
            headers.get("cache-control").unwrap(),
            "public, max-age=60"
        );
    }

    #[test]
    fn stale_hit_response_headers() {
        let response = cached_response(lookup(CacheSource::Edge, true), CachePolicy::AGGREGATED);
        let headers = response.headers();
        assert_eq!(headers.get("x-cache").unwrap(), "HIT");
        assert_eq!(headers.get("x-cache-source").unwrap(), "edge");
        assert_eq!(headers.get("x-cache-stale").unwrap(), "true");
    }

    #[test]
    fn slow_hit_is_still_a_hit() {
        let response = cached_response(lookup(CacheSource::Slow, false), CachePolicy::WORLDS);
        let headers = response.headers();
        assert_eq!(headers.get("x-cache").unwrap(), "HIT");
        assert_eq!(headers.get("x-cache-source").unwrap(), "slow");
        assert_eq!(
            headers.get("cache-control").unwrap(),
            "public, max-age=3600"
        );
    }
}
