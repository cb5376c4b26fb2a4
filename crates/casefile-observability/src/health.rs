//! `/api/health` liveness and `/metrics` exposition

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::Metrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Both AI backends are wired; individual keys may still be missing
    pub ai_services: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Shared by the health and metrics handlers
#[derive(Clone)]
pub struct HealthState {
    pub metrics: Arc<Metrics>,
    started_at: Instant,
}

impl HealthState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            started_at: Instant::now(),
        }
    }
}

/// Routes for `/api/health` and `/metrics`, ready to merge into the API router
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        ai_services: "dual-ai-active".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn metrics_handler(State(state): State<HealthState>) -> Response {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", err);
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let app = health_router(HealthState::new(metrics));

        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.ai_services, "dual-ai-active");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_rate_limit_rejection("operations");
        let app = health_router(HealthState::new(metrics));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("casefile_rate_limit_rejections_total"));
    }
}
