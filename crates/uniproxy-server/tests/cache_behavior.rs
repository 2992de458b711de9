use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use uniproxy_server::{AppConfig, build_app};

#[derive(Clone)]
struct MockUpstream {
    aggregated_calls: Arc<AtomicUsize>,
    delay: Duration,
}

async fn mock_aggregated(
    State(mock): State<MockUpstream>,
    Path((datacenter, item_ids)): Path<(String, String)>,
) -> impl IntoResponse {
    mock.aggregated_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(mock.delay).await;
    Json(json!({
        "datacenter": datacenter,
        "items": [{ "id": 5808, "p": 100 }],
        "requested": item_ids,
    }))
}

fn upstream_router(mock: MockUpstream) -> Router {
    Router::new()
        .route("/api/v2/aggregated/{datacenter}/{item_ids}", get(mock_aggregated))
        .with_state(mock)
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

async fn start_proxy_against(upstream_base: String) -> String {
    let cfg = AppConfig {
        universalis_api_base: upstream_base,
        ..AppConfig::default()
    };
    let app = build_app(&cfg).await.expect("build app");
    spawn(app).await
}

#[tokio::test]
async fn first_request_misses_then_hits_with_case_folded_datacenter() {
    let calls = Arc::new(AtomicUsize::new(0));
    let upstream = spawn(upstream_router(MockUpstream {
        aggregated_calls: Arc::clone(&calls),
        delay: Duration::ZERO,
    }))
    .await;
    let base = start_proxy_against(upstream).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/5808", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers.get("x-cache").unwrap(), "MISS");
    assert_eq!(headers.get("x-cache-source").unwrap(), "upstream");
    assert_eq!(headers.get("x-cache-stale").unwrap(), "false");
    assert!(headers.contains_key("access-control-allow-origin"));
    let first_body: Value = resp.json().await.unwrap();
    assert_eq!(first_body["items"][0]["id"], 5808);

    // Same request with different casing shares the cache entry.
    let resp = client
        .get(format!("{}/api/v2/aggregated/crystal/5808", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers.get("x-cache").unwrap(), "HIT");
    assert_eq!(headers.get("x-cache-source").unwrap(), "edge");
    assert_eq!(headers.get("x-cache-stale").unwrap(), "false");
    let second_body: Value = resp.json().await.unwrap();
    assert_eq!(second_body, first_body);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn item_id_order_shares_one_cache_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let upstream = spawn(upstream_router(MockUpstream {
        aggregated_calls: Arc::clone(&calls),
        delay: Duration::ZERO,
    }))
    .await;
    let base = start_proxy_against(upstream).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/3,1,2", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers().get("x-cache").unwrap(), "MISS");
    // The upstream is asked for the normalized id list.
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["requested"], "1,2,3");

    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/2,1,3", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers().get("x-cache").unwrap(), "HIT");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_cold_requests_share_one_upstream_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let upstream = spawn(upstream_router(MockUpstream {
        aggregated_calls: Arc::clone(&calls),
        delay: Duration::from_millis(150),
    }))
    .await;
    let base = start_proxy_against(upstream).await;
    let client = reqwest::Client::new();

    let url = format!("{}/api/v2/aggregated/Crystal/5808", base);
    let (a, b) = tokio::join!(client.get(&url).send(), client.get(&url).send());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.status(), reqwest::StatusCode::OK);
    assert_eq!(b.status(), reqwest::StatusCode::OK);

    let body_a: Value = a.json().await.unwrap();
    let body_b: Value = b.json().await.unwrap();
    assert_eq!(body_a, body_b);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn upstream_429_maps_to_429_with_fixed_retry_after() {
    let upstream = spawn(Router::new().route(
        "/api/v2/aggregated/{datacenter}/{item_ids}",
        get(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
    ))
    .await;
    let base = start_proxy_against(upstream).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/5808", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.headers().get("retry-after").unwrap(), "60");
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Rate limited by upstream API");
    assert_eq!(body["retryAfter"], 60);
}

#[tokio::test]
async fn upstream_5xx_is_mirrored_with_status_in_body() {
    let upstream = spawn(Router::new().route(
        "/api/v2/aggregated/{datacenter}/{item_ids}",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
    ))
    .await;
    let base = start_proxy_against(upstream).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/5808", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], 503);
}

#[tokio::test]
async fn upstream_failure_is_not_cached_and_allows_retry() {
    // An upstream that fails once, then succeeds.
    let calls = Arc::new(AtomicUsize::new(0));
    let flaky = {
        let calls = Arc::clone(&calls);
        get(move || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response()
                } else {
                    Json(json!({ "items": [] })).into_response()
                }
            }
        })
    };
    let upstream = spawn(Router::new().route("/api/v2/aggregated/{datacenter}/{item_ids}", flaky)).await;
    let base = start_proxy_against(upstream).await;
    let client = reqwest::Client::new();

    let url = format!("{}/api/v2/aggregated/Crystal/5808", base);
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    // The failed fetch must not poison the key.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transport_failure_maps_to_502() {
    // Point the proxy at a closed port.
    let base = start_proxy_against("http://127.0.0.1:9".to_string()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/5808", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Failed to fetch from upstream API");
}
