use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Reasons a credential request or a presented credential is refused.
///
/// Every variant surfaces as the same `401` at the HTTP boundary; the kind is
/// only used for logs and metrics.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("client identity does not match the trusted client")]
    InvalidClient,

    #[error("token signature is invalid or the token is malformed")]
    BadSignature,

    #[error("token issuer does not match")]
    IssuerMismatch,

    #[error("token audience does not match")]
    AudienceMismatch,

    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,
}

impl AuthError {
    /// Metric label for this failure
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidClient => "invalid_client",
            AuthError::BadSignature => "bad_signature",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::Expired => "expired",
            AuthError::NotYetValid => "not_yet_valid",
        }
    }
}

/// Failures while minting a credential
#[derive(Error, Debug)]
pub enum IssueError {
    #[error("token lifetime of {0} minutes is out of range")]
    LifetimeOutOfRange(i64),

    #[error("failed to encode credential: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// Failures of the submission forwarder
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("payload value is empty")]
    EmptyPayload,

    #[error("event of {size} bytes does not fit a batch of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("publish to queue failed: {0}")]
    TransientPublishError(String),

    #[error("failed to serialize submission: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForwardError {
    pub fn transient(msg: impl Into<String>) -> Self {
        ForwardError::TransientPublishError(msg.into())
    }
}

/// Failures on the real-time connection path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection is not authorized: {0}")]
    Unauthorized(AuthError),

    #[error("connection transport is closed")]
    TransportClosed,
}

/// Application error type returned by HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Forwarding error: {0}")]
    Forward(#[from] ForwardError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) | AppError::Connection(ConnectionError::Unauthorized(_)) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forward(ForwardError::EmptyPayload) => StatusCode::BAD_REQUEST,
            AppError::Forward(ForwardError::PayloadTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            AppError::Forward(ForwardError::TransientPublishError(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth(_) | AppError::Connection(_) => "Unauthorized".to_string(),
            AppError::Forward(ForwardError::EmptyPayload) => "Payload value is empty".to_string(),
            AppError::Forward(ForwardError::PayloadTooLarge { .. }) => {
                "Payload is too large".to_string()
            }
            AppError::Forward(ForwardError::TransientPublishError(_)) => {
                "Message queue unavailable".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Forward(ForwardError::EmptyPayload) => "EMPTY_PAYLOAD",
            AppError::Forward(ForwardError::PayloadTooLarge { .. }) => "PAYLOAD_TOO_LARGE",
            AppError::Forward(ForwardError::TransientPublishError(_)) => "QUEUE_UNAVAILABLE",
            AppError::Forward(ForwardError::Serialization(_)) => "SERIALIZATION_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();

        // Unauthorized outcomes carry no body so failure kinds stay indistinguishable
        if status == StatusCode::UNAUTHORIZED {
            return status.into_response();
        }

        let body = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            json!({
                "error": "Internal server error",
                "error_code": self.error_code(),
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "error_code": self.error_code(),
                "status": status.as_u16(),
            })
        };

        (status, axum::Json(body)).into_response()
    }
}

impl AppError {
    /// Create an internal server error
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_map_to_unauthorized() {
        for kind in [
            AuthError::InvalidClient,
            AuthError::BadSignature,
            AuthError::IssuerMismatch,
            AuthError::AudienceMismatch,
            AuthError::Expired,
            AuthError::NotYetValid,
        ] {
            assert_eq!(AppError::from(kind).status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_auth_failures_share_user_message() {
        let expired = AppError::from(AuthError::Expired);
        let forged = AppError::from(AuthError::BadSignature);

        assert_eq!(expired.user_message(), forged.user_message());
    }

    #[test]
    fn test_forward_error_status_codes() {
        assert_eq!(
            AppError::from(ForwardError::PayloadTooLarge { size: 10, capacity: 5 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::from(ForwardError::transient("down")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(ForwardError::EmptyPayload).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_serialization_failures_are_internal() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let app_err = AppError::from(err);

        assert_eq!(app_err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app_err.error_code(), "JSON_ERROR");
        assert_eq!(app_err.user_message(), "Internal server error");
    }

    #[test]
    fn test_unauthorized_response_has_no_body() {
        let response = AppError::from(AuthError::Expired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get("content-type").is_none());
    }
}
