// ============================================================================
// Axum Extractors
// ============================================================================
//
// Custom extractors for Axum routes:
// - AuthenticatedClient: Extracts and validates the bearer credential from
//   the Authorization header
//
// ============================================================================

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use std::sync::Arc;

use crate::auth::Credential;
use crate::context::AppContext;
use crate::error::AppError;

/// Extractor for the verified credential of the calling client
///
/// Usage:
/// ```rust,ignore
/// async fn handler(client: AuthenticatedClient, ...) -> Result<...> {
///     let client_id = client.0.subject();
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedClient(pub Credential);

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for AuthenticatedClient {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            tracing::warn!(path = %parts.uri.path(), "Missing or malformed Authorization header");
            return Err(AppError::Auth(crate::error::AuthError::BadSignature));
        };

        let credential = state.auth_manager.authenticate(token)?;
        Ok(AuthenticatedClient(credential))
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
