use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use uniproxy_server::{AppConfig, build_app};

/// Minimal upstream double; these tests never reach it but the proxy needs a
/// valid base URL.
fn upstream_router() -> Router {
    Router::new()
        .route(
            "/api/v2/data-centers",
            get(|| async { Json(json!([{ "name": "Crystal", "region": "North-America" }])) }),
        )
        .route(
            "/api/v2/worlds",
            get(|| async { Json(json!([{ "id": 91, "name": "Balmung" }])) }),
        )
}

async fn start(
    app: Router,
) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{}", addr), tx, server)
}

async fn start_proxy() -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let (upstream_base, _tx, _handle) = start(upstream_router()).await;
    // Keep the upstream alive for the duration of the test process.
    std::mem::forget(_tx);

    let cfg = AppConfig {
        universalis_api_base: upstream_base,
        allowed_origins: vec!["https://market.example".into()],
        ..AppConfig::default()
    };
    let app = build_app(&cfg).await.expect("build app");
    start(app).await
}

#[tokio::test]
async fn identity_and_health_endpoints() {
    let (base, shutdown_tx, handle) = start_proxy().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/", base)).send().await.unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "uniproxy");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "development");
    assert!(body["version"].is_string());

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn preflight_returns_204_with_cors_headers() {
    let (base, shutdown_tx, handle) = start_proxy().await;
    let client = reqwest::Client::new();

    let resp = client
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/api/v2/worlds", base),
        )
        .header("origin", "https://market.example")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
    let headers = resp.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "https://market.example"
    );
    assert_eq!(
        headers.get("access-control-allow-methods").unwrap(),
        "GET, OPTIONS"
    );
    assert_eq!(
        headers.get("access-control-allow-headers").unwrap(),
        "Content-Type, Accept"
    );
    assert_eq!(headers.get("access-control-max-age").unwrap(), "86400");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn unlisted_origin_gets_fallback_cors_origin() {
    let (base, shutdown_tx, handle) = start_proxy().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", base))
        .header("origin", "https://somewhere-else.example")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "https://market.example"
    );

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn localhost_origin_is_allowed_in_development() {
    let (base, shutdown_tx, handle) = start_proxy().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", base))
        .header("origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn unknown_route_is_404_with_cors() {
    let (base, shutdown_tx, handle) = start_proxy().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v9/nothing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Not Found");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn validation_failures_return_400_with_cors() {
    let (base, shutdown_tx, handle) = start_proxy().await;
    let client = reqwest::Client::new();

    // Unknown datacenter.
    let resp = client
        .get(format!("{}/api/v2/aggregated/Atlantis/5808", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Atlantis"));

    // Non-numeric ids.
    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/abc", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    // Id out of range.
    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/0", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    // Empty segment.
    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/1,,2", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/1000001", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    // Too many ids.
    let too_many = (1..=101)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let resp = client
        .get(format!("{}/api/v2/aggregated/Crystal/{}", base, too_many))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn static_lists_are_proxied_and_cached() {
    let (base, shutdown_tx, handle) = start_proxy().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v2/data-centers", base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.headers().get("x-cache").unwrap(), "MISS");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body[0]["name"], "Crystal");

    let resp = client
        .get(format!("{}/api/v2/data-centers", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(resp.headers().get("x-cache-source").unwrap(), "edge");

    let resp = client
        .get(format!("{}/api/v2/worlds", base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body[0]["name"], "Balmung");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
