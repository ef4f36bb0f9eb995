// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware
// - auth.rs: Credential issuance and validation
// - submissions.rs: Data, feedback and anomaly endpoints
// - health.rs: Health check and metrics endpoints
// - extractors.rs: Custom Axum extractors (bearer credential)
// - middleware.rs: Request logging
//
// The real-time hub route is served by crate::hub::session on the same
// router.
//
// ============================================================================

mod auth;
pub mod extractors;
mod health;
mod middleware;
mod submissions;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;
use crate::context::AppContext;
use crate::hub::session::hub_handler;

pub use health::HEALTHY_MESSAGE;

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    let hub_route = app_context.config.hub.route();
    let cors = cors_layer(&app_context.config.cors);

    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        // Authentication endpoints
        .route("/auth/getToken", post(auth::get_token))
        .route("/auth/validateToken", post(auth::validate_token))
        // Submissions (bearer credential)
        .route("/data", post(submissions::submit_data))
        .route("/feedback", post(submissions::submit_feedback))
        .route("/anomaly", post(submissions::submit_anomaly))
        // Real-time hub (WebSocket upgrade)
        .route(&hub_route, get(hub_handler))
        // Apply middleware (order matters - last added runs first)
        .layer(
            ServiceBuilder::new()
                // Tracing layer (outermost - runs first)
                .layer(TraceLayer::new_for_http())
                // Request logging
                .layer(axum::middleware::from_fn(middleware::request_logging))
                .layer(cors)
                .into_inner(),
        )
        .with_state(app_context)
}

/// Origins ending in a configured suffix may call the API with credentials
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let config = config.clone();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts| {
                origin
                    .to_str()
                    .map(|origin| config.is_allowed(origin))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("x-signalr-user-agent"),
        ])
        .allow_credentials(true)
}
