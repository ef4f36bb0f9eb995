// ============================================================================
// Submission Routes
// ============================================================================
//
// Endpoints (bearer credential required):
// - POST /data     - Forward a data point to the data queue
// - POST /feedback - Forward operator feedback to the feedback queue
// - POST /anomaly  - Push an anomaly to every hub subscriber
//
// A data point or anomaly without a value is accepted and silently dropped.
// Feedback is always forwarded.
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::{AppError, ForwardError};
use crate::hub::ANOMALY_CONTROLLER;
use crate::models::{AnomalyEvent, Data, Feedback};
use crate::routes::extractors::AuthenticatedClient;

/// POST /data
pub async fn submit_data(
    State(app_context): State<Arc<AppContext>>,
    client: AuthenticatedClient,
    Json(data): Json<Data>,
) -> Result<impl IntoResponse, AppError> {
    match app_context.forwarder.forward_data(data).await {
        Ok(id) => {
            tracing::debug!(subject = %client.0.subject(), data_id = %id, "Data point accepted");
            Ok(StatusCode::OK)
        }
        Err(ForwardError::EmptyPayload) => {
            tracing::debug!(subject = %client.0.subject(), "Data point without value ignored");
            Ok(StatusCode::OK)
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /feedback
pub async fn submit_feedback(
    State(app_context): State<Arc<AppContext>>,
    client: AuthenticatedClient,
    Json(feedback): Json<Feedback>,
) -> Result<impl IntoResponse, AppError> {
    app_context.forwarder.forward_feedback(&feedback).await?;

    tracing::debug!(
        subject = %client.0.subject(),
        is_anomaly = feedback.is_anomaly,
        "Feedback accepted"
    );

    Ok(StatusCode::OK)
}

/// POST /anomaly
pub async fn submit_anomaly(
    State(app_context): State<Arc<AppContext>>,
    client: AuthenticatedClient,
    Json(event): Json<AnomalyEvent>,
) -> Result<impl IntoResponse, AppError> {
    if !event.is_publishable() {
        tracing::debug!(subject = %client.0.subject(), "Anomaly without data value ignored");
        return Ok(StatusCode::OK);
    }

    let report = app_context.hub.dispatch(ANOMALY_CONTROLLER, &event).await?;

    tracing::debug!(
        subject = %client.0.subject(),
        delivered = report.delivered,
        dropped = report.dropped,
        "Anomaly accepted"
    );

    Ok(StatusCode::OK)
}
