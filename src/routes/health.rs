// ============================================================================
// Health and Metrics Routes
// ============================================================================
//
// Endpoints:
// - GET /health       - Liveness
// - GET /health/ready - Readiness (queue backend answers ping)
// - GET /metrics      - Prometheus metrics
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::metrics;

pub const HEALTHY_MESSAGE: &str = "API Gateway is Healthy";

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, HEALTHY_MESSAGE)
}

/// GET /health/ready
pub async fn readiness_check(
    State(app_context): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, AppError> {
    match app_context.forwarder.ping().await {
        Ok(()) => Ok((StatusCode::OK, "OK")),
        Err(e) => {
            tracing::error!("Readiness check failed: {}", e);
            Ok((StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"))
        }
    }
}

/// GET /metrics
/// Prometheus metrics endpoint
pub async fn metrics() -> Result<impl IntoResponse, AppError> {
    match metrics::gather_metrics() {
        Ok(metrics_data) => Ok((
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            metrics_data,
        )),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain")],
                "Internal Server Error".to_string(),
            ))
        }
    }
}
