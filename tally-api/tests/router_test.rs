//! HTTP surface tests: dashboard routes, cache header, errors, health and
//! CORS, driven through the full router with `oneshot`.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tally_api::{build_pipeline, create_router, ApiConfig, AppState};
use tally_cache::MemoryStore;
use tally_test_utils::fixtures::leaderboard_rows;
use tally_test_utils::CountingExecutor;
use tower::ServiceExt;

fn app_with(executor: Arc<CountingExecutor>, config: &ApiConfig) -> Router {
    let pipeline = build_pipeline(Arc::new(MemoryStore::new()), executor, None).unwrap();
    create_router(AppState::new(pipeline), config)
}

fn app(executor: Arc<CountingExecutor>) -> Router {
    app_with(executor, &ApiConfig::default())
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn cache_header(response: &Response) -> Option<&str> {
    response.headers().get("x-cache").and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn dashboard_reports_miss_then_hit() {
    let executor = Arc::new(CountingExecutor::new().with_rows("leaderboard", leaderboard_rows()));
    let app = app(executor.clone());

    let first = get(&app, "/leaderboard?timeframe=week").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_header(&first), Some("miss"));
    let first_body = json_body(first).await;

    let second = get(&app, "/leaderboard?timeframe=WEEK&utm=x").await;
    assert_eq!(cache_header(&second), Some("hit"));
    assert_eq!(json_body(second).await, first_body);

    assert_eq!(executor.calls(), 1);
    assert_eq!(first_body["leaderboard"].as_array().map(Vec::len), Some(4));
    assert_eq!(first_body["leaderboard"][0]["MCAP"], Value::Null);
}

#[tokio::test]
async fn malformed_query_string_falls_back_to_defaults() {
    let executor = Arc::new(CountingExecutor::new().with_rows("leaderboard", leaderboard_rows()));
    let app = app(executor.clone());

    let response = get(&app, "/leaderboard?timeframe=%zz&&excludes=%ff&flag").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(cache_header(&response), Some("miss"));
    assert!(json_body(response).await["leaderboard"].is_array());

    let plain = get(&app, "/leaderboard").await;
    assert_eq!(cache_header(&plain), Some("miss"));
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let app = app(Arc::new(CountingExecutor::new()));

    let response = get(&app, "/wallets").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!("ROUTE_NOT_FOUND"));
}

#[tokio::test]
async fn warehouse_outage_is_503_without_details() {
    let executor = Arc::new(CountingExecutor::new());
    executor.set_unavailable(true);
    let app = app(executor);

    let response = get(&app, "/overview").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["code"], json!("WAREHOUSE_UNAVAILABLE"));
    assert!(!body["message"].as_str().unwrap_or_default().contains("refused"));
}

#[tokio::test]
async fn health_endpoints() {
    let executor = Arc::new(CountingExecutor::new());
    let app = app(executor.clone());

    let ping = get(&app, "/health/ping").await;
    assert_eq!(ping.status(), StatusCode::OK);

    let live = get(&app, "/health/live").await;
    assert_eq!(json_body(live).await["status"], json!("healthy"));

    let ready = get(&app, "/health/ready").await;
    assert_eq!(ready.status(), StatusCode::OK);
    let body = json_body(ready).await;
    assert_eq!(body["details"]["warehouse"]["status"], json!("healthy"));
    assert_eq!(body["details"]["cache"]["status"], json!("healthy"));

    executor.set_unavailable(true);
    let not_ready = get(&app, "/health/ready").await;
    assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(not_ready).await;
    assert_eq!(body["details"]["warehouse"]["error"], json!("warehouse unreachable"));
}

#[tokio::test]
async fn metrics_endpoint_exposes_dashboard_counters() {
    let app = app(Arc::new(CountingExecutor::new()));
    get(&app, "/leaderboard").await;

    let response = get(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("tally_cache_lookups_total"));
    assert!(text.contains("tally_http_requests_total"));
}

async fn get_with_origin(app: &Router, origin: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri("/health/ping")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn cors_allows_any_origin_in_development() {
    let app = app(Arc::new(CountingExecutor::new()));
    let response = get_with_origin(&app, "http://localhost:3000").await;
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn cors_restricts_origins_in_production() {
    let config = ApiConfig {
        cors_origins: vec!["https://dash.example.com".into(), "*.arbitrum.io".into()],
        ..Default::default()
    };
    let app = app_with(Arc::new(CountingExecutor::new()), &config);

    for allowed in ["https://dash.example.com", "https://stip.arbitrum.io"] {
        let response = get_with_origin(&app, allowed).await;
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()),
            Some(allowed)
        );
    }

    let denied = get_with_origin(&app, "https://evil.com").await;
    assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
