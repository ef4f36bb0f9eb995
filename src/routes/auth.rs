// ============================================================================
// Authentication Routes
// ============================================================================
//
// Endpoints:
// - POST /auth/getToken      - Exchange the trusted client identity for a credential
// - POST /auth/validateToken - Check a credential; 200 when valid, 401 otherwise
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::auth::ClientIdentity;
use crate::context::AppContext;
use crate::error::AppError;
use crate::models::{TokenResponse, ValidateTokenRequest};

/// POST /auth/getToken
pub async fn get_token(
    State(app_context): State<Arc<AppContext>>,
    Json(identity): Json<ClientIdentity>,
) -> Result<impl IntoResponse, AppError> {
    let credential = app_context.auth_manager.issue_token(&identity)?;

    Ok((
        StatusCode::OK,
        Json(TokenResponse {
            token: credential.into_token(),
        }),
    ))
}

/// POST /auth/validateToken
pub async fn validate_token(
    State(app_context): State<Arc<AppContext>>,
    Json(request): Json<ValidateTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let credential = app_context.auth_manager.authenticate(&request.token)?;

    tracing::debug!(
        subject = %credential.subject(),
        jti = %credential.unique_id(),
        "Credential validated"
    );

    Ok(StatusCode::OK)
}
