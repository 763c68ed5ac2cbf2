use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use bidguard::api::{create_router, ApiState};
use bidguard::config::GuardConfig;
use bidguard::guard::{CacheKey, GuardedFetcher};
use bidguard::utils::clock::ManualClock;

fn app() -> (Router, Arc<GuardedFetcher>) {
    let fetcher = Arc::new(GuardedFetcher::new(&GuardConfig::default(), Arc::new(ManualClock::new(0))));
    (create_router(ApiState::new(fetcher.clone())), fetcher)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Option<Value>) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).ok())
}

#[tokio::test]
async fn operator_can_stop_and_resume() {
    let (app, fetcher) = app();

    let (status, body) = send(&app, "POST", "/emergency-stop", Some(json!({"reason": "cost spike"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["reason"], "cost spike");
    assert!(fetcher.is_emergency_stopped());

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health.unwrap()["label"], "EMERGENCY STOPPED");

    let (status, body) = send(&app, "DELETE", "/emergency-stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["is_emergency_stopped"], false);
    assert!(!fetcher.is_emergency_stopped());
}

#[tokio::test]
async fn usage_reset_and_cache_clear() {
    let (app, fetcher) = app();
    let key = CacheKey::new("bid_count", &["8453", "0xabc", "1"]);
    let _: u64 = fetcher
        .guarded_call(&key, Duration::from_secs(15), || async { Ok(3) })
        .await
        .unwrap();

    let (_, usage) = send(&app, "GET", "/usage", None).await;
    let usage = usage.unwrap();
    assert_eq!(usage["total_calls"], 1);
    assert_eq!(usage["cache"]["entries"], 1);

    let (status, _) = send(&app, "POST", "/usage/reset", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", "/cache", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, usage) = send(&app, "GET", "/usage", None).await;
    let usage = usage.unwrap();
    assert_eq!(usage["total_calls"], 0);
    assert_eq!(usage["cache"]["entries"], 0);
    // Counters reset, limiter window untouched
    assert_eq!(usage["rate_limiter"]["calls_in_window"], 1);
}

#[tokio::test]
async fn blank_reason_falls_back_to_default() {
    let (app, _) = app();
    let (_, body) = send(&app, "POST", "/emergency-stop", Some(json!({"reason": "   "}))).await;
    assert_eq!(body.unwrap()["reason"], "Manual stop by operator");
}
