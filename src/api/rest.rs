use axum::{
    Router,
    routing::{get, post, delete},
    extract::{State, Json},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::api::websocket::{emergency_ws_handler, StopEvent, StopEvents};
use crate::guard::{GuardStatus, GuardedFetcher, ListenerHandle, RefreshAvailability, UsageStats};
use crate::observability::metrics;

const DEFAULT_STOP_REASON: &str = "Manual stop by operator";

pub struct ApiState {
    pub fetcher: Arc<GuardedFetcher>,
    pub stop_events: StopEvents,
    listener: Mutex<Option<ListenerHandle>>,
}

impl ApiState {
    /// Wire a listener that fans emergency-stop changes out to websockets
    pub fn new(fetcher: Arc<GuardedFetcher>) -> Arc<Self> {
        let (stop_events, _) = broadcast::channel(64);

        let events = stop_events.clone();
        let emergency = Arc::downgrade(fetcher.usage().emergency_stop());
        let listener = fetcher.add_listener(move |stopped| {
            let reason = emergency.upgrade().and_then(|stop| stop.reason());
            // No subscribers is fine
            let _ = events.send(StopEvent {
                is_emergency_stopped: stopped,
                reason,
                at: Utc::now(),
            });
        });

        Arc::new(ApiState {
            fetcher,
            stop_events,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn current_stop_event(&self) -> StopEvent {
        StopEvent {
            is_emergency_stopped: self.fetcher.is_emergency_stopped(),
            reason: self.fetcher.usage().emergency_stop().reason(),
            at: Utc::now(),
        }
    }
}

impl Drop for ApiState {
    fn drop(&mut self) {
        let listener = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(listener) = listener {
            listener.unsubscribe();
        }
    }
}

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/usage", get(get_usage))
        .route("/usage/reset", post(reset_usage))
        .route("/emergency-stop", post(force_stop).delete(reset_emergency_stop))
        .route("/cache", delete(clear_cache))
        .route("/metrics", get(get_metrics))
        .route("/ws/emergency", get(emergency_ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: GuardStatus,
    label: String,
}

async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let status = state.fetcher.usage_stats().status();
    Json(HealthResponse {
        status,
        label: status.label().to_string(),
    })
}

#[derive(Serialize)]
struct UsageResponse {
    #[serde(flatten)]
    stats: UsageStats,
    status: GuardStatus,
    status_label: &'static str,
    cache_hit_rate: f64,
    refresh: RefreshAvailability,
}

async fn get_usage(State(state): State<Arc<ApiState>>) -> Json<UsageResponse> {
    let stats = state.fetcher.usage_stats();
    let status = stats.status();
    Json(UsageResponse {
        status,
        status_label: status.label(),
        cache_hit_rate: stats.cache_hit_rate(),
        refresh: state.fetcher.refresh_availability(),
        stats,
    })
}

async fn reset_usage(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.fetcher.usage().reset_counters();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct StopRequest {
    reason: Option<String>,
}

async fn force_stop(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<StopRequest>>,
) -> Json<StopEvent> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());

    tracing::warn!("Emergency stop requested via API: {}", reason);
    state.fetcher.force_stop(reason);
    Json(state.current_stop_event())
}

async fn reset_emergency_stop(State(state): State<Arc<ApiState>>) -> Json<StopEvent> {
    tracing::warn!("Emergency stop reset requested via API");
    state.fetcher.reset_emergency_stop();
    Json(state.current_stop_event())
}

async fn clear_cache(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.fetcher.clear_cache();
    StatusCode::NO_CONTENT
}

async fn get_metrics() -> Response {
    match metrics::gather_text() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<ApiState> {
        ApiState::new(Arc::new(GuardedFetcher::with_system_clock(&GuardConfig::default())))
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_normal() {
        let app = create_router(state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["label"], "Normal");
    }

    #[tokio::test]
    async fn stop_without_body_uses_default_reason() {
        let state = state();
        let app = create_router(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/emergency-stop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["is_emergency_stopped"], true);
        assert_eq!(body["reason"], DEFAULT_STOP_REASON);
        assert!(state.fetcher.is_emergency_stopped());
    }

    #[tokio::test]
    async fn stop_change_is_broadcast() {
        let state = state();
        let mut events = state.stop_events.subscribe();

        state.fetcher.force_stop("cost spike");
        let event = events.recv().await.unwrap();
        assert!(event.is_emergency_stopped);
        assert_eq!(event.reason.as_deref(), Some("cost spike"));

        state.fetcher.reset_emergency_stop();
        assert!(!events.recv().await.unwrap().is_emergency_stopped);
    }

    #[tokio::test]
    async fn dropping_state_unsubscribes_listener() {
        let fetcher = Arc::new(GuardedFetcher::with_system_clock(&GuardConfig::default()));
        let state = ApiState::new(fetcher.clone());
        assert_eq!(fetcher.usage().emergency_stop().listener_count(), 1);

        drop(state);
        assert_eq!(fetcher.usage().emergency_stop().listener_count(), 0);
    }

    #[tokio::test]
    async fn usage_includes_status_and_refresh() {
        let app = create_router(state());
        let response = app
            .oneshot(Request::builder().uri("/usage").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["total_calls"], 0);
        assert_eq!(body["status"], "normal");
        assert_eq!(body["refresh"]["can_refresh"], true);
        assert_eq!(body["rate_limiter"]["max_calls_per_window"], 30);
    }

    #[tokio::test]
    async fn metrics_are_plain_text() {
        let _ = metrics::register_metrics();
        let app = create_router(state());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("bidguard_"));
    }
}
