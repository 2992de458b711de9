//! Upstream Universalis API client.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use reqwest::header;

use uniproxy_core::{CachedPayload, UpstreamError, metrics};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("uniproxy/", env!("CARGO_PKG_VERSION"));

/// Thin JSON client for the upstream API.
///
/// All responses are consumed as JSON; a body that does not parse is a
/// transport failure, not cached content.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build upstream HTTP client: {e}"))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` from the upstream and return the raw JSON payload.
    pub async fn fetch_json(&self, path: &str) -> Result<CachedPayload, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "fetching upstream");

        let response = self
            .http
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                metrics::record_upstream_fetch("error");
                if e.is_timeout() {
                    UpstreamError::transport(format!("upstream request timed out: {e}"))
                } else if e.is_connect() {
                    UpstreamError::transport(format!("failed to connect to upstream: {e}"))
                } else {
                    UpstreamError::transport(format!("upstream request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            metrics::record_upstream_fetch("rate_limited");
            tracing::warn!(url = %url, "upstream rate limited");
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            metrics::record_upstream_fetch("error");
            tracing::warn!(url = %url, status = %status, "upstream returned error status");
            return Err(UpstreamError::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown"),
            ));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        let body = response.bytes().await.map_err(|e| {
            metrics::record_upstream_fetch("error");
            UpstreamError::transport(format!("failed to read upstream body: {e}"))
        })?;

        if let Err(e) = serde_json::from_slice::<serde_json::Value>(&body) {
            metrics::record_upstream_fetch("error");
            return Err(UpstreamError::transport(format!(
                "invalid JSON from upstream: {e}"
            )));
        }

        metrics::record_upstream_fetch("ok");
        Ok(CachedPayload {
            body: Arc::new(body.to_vec()),
            content_type,
        })
    }
}
