use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use uniproxy_core::{SlidingWindowLimiter, SwrCache};

use crate::config::{AppConfig, RedisConfig};
use crate::middleware::CorsPolicy;
use crate::upstream::UpstreamClient;
use crate::{handlers, middleware as app_middleware};

#[derive(Clone)]
pub struct AppState {
    /// Dual-tier SWR cache answering most requests.
    pub cache: Arc<SwrCache>,
    /// Sliding-window limiter gating the API routes.
    pub limiter: Arc<SlidingWindowLimiter>,
    /// Upstream Universalis client.
    pub upstream: Arc<UpstreamClient>,
    /// Resolved CORS policy.
    pub cors: Arc<CorsPolicy>,
    /// Application configuration for runtime access.
    pub config: Arc<AppConfig>,
}

/// Create the cache, falling back to edge-only mode when the slow tier is
/// disabled or unreachable.
pub async fn create_cache(redis: &RedisConfig) -> SwrCache {
    if !redis.enabled {
        tracing::info!("slow tier disabled, running edge-only cache");
        return SwrCache::new_local();
    }

    let pool = match deadpool_redis::Config::from_url(&redis.url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create Redis pool, falling back to edge-only cache");
            return SwrCache::new_local();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!(url = %redis.url, "slow tier connected");
            SwrCache::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unreachable, falling back to edge-only cache");
            SwrCache::new_local()
        }
    }
}

/// Builds the application router with the given configuration.
pub async fn build_app(cfg: &AppConfig) -> Result<Router, anyhow::Error> {
    crate::config::set_development_mode(cfg.environment.is_development());

    let cache = Arc::new(create_cache(&cfg.cache.redis).await);
    let limiter = Arc::new(SlidingWindowLimiter::new(cfg.rate_limit_policy()));
    let upstream = Arc::new(UpstreamClient::new(&cfg.universalis_api_base)?);
    let cors = Arc::new(CorsPolicy::from_config(cfg));

    tracing::info!(
        upstream = %upstream.base_url(),
        cache_mode = %cache.mode(),
        rate_limit = %cfg.rate_limit_requests,
        rate_window_secs = %cfg.rate_limit_window_seconds,
        "proxy configured"
    );

    let state = AppState {
        cache,
        limiter,
        upstream,
        cors,
        config: Arc::new(cfg.clone()),
    };

    Ok(build_router(state))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/api/v2/aggregated/{datacenter}/{item_ids}",
            get(handlers::aggregated),
        )
        .route("/api/v2/data-centers", get(handlers::data_centers))
        .route("/api/v2/worlds", get(handlers::worlds))
        .fallback(handlers::not_found)
        // Middleware stack; the first .layer() is closest to the handler.
        // CORS is outermost so every response, including 429s and 5xx,
        // carries the headers and preflights never hit the limiter.
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::rate_limit,
        ))
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    // Health probes and metric scrapes are noise at info level.
                    let path = req.uri().path();
                    if path == "/health" || path == "/metrics" {
                        return tracing::span!(tracing::Level::TRACE, "noop");
                    }
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %method,
                        http.target = %uri,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        if let Some(meta) = span.metadata()
                            && meta.name() != "noop"
                        {
                            tracing::info!(
                                http.status = %res.status().as_u16(),
                                elapsed_ms = %latency.as_millis(),
                                "request handled"
                            );
                        }
                    },
                ),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::cors,
        ))
        .with_state(state)
}

pub struct UniproxyServer {
    addr: SocketAddr,
    app: Router,
}

impl UniproxyServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Builds the server asynchronously.
    pub async fn build(self) -> Result<UniproxyServer, anyhow::Error> {
        let app = build_app(&self.config).await?;
        Ok(UniproxyServer {
            addr: self.addr,
            app,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
