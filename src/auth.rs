pub mod codec;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::config::{ClientSettings, Config, SigningMaterial};
use crate::error::{AppError, AppResult, AuthError};
use crate::metrics;

pub use codec::{Claims, Credential};

/// Client id / secret pair presented to `POST /auth/getToken`
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Constant-time comparison of both fields
    fn matches(&self, trusted: &ClientSettings) -> bool {
        let id_ok = self
            .client_id
            .as_bytes()
            .ct_eq(trusted.client_id.as_bytes());
        let secret_ok = self
            .client_secret
            .as_bytes()
            .ct_eq(trusted.client_secret.as_bytes());
        (id_ok & secret_ok).into()
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Issues credentials to the trusted client and verifies presented ones.
pub struct AuthManager {
    signing: SigningMaterial,
    trusted: ClientSettings,
}

impl AuthManager {
    pub fn new(signing: SigningMaterial, trusted: ClientSettings) -> Self {
        tracing::info!(
            issuer = %signing.issuer,
            audience = %signing.audience,
            ttl_minutes = signing.ttl_minutes,
            "Initializing credential issuer (HS256)"
        );
        Self { signing, trusted }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.signing.clone(), config.client.clone())
    }

    /// Exchange the trusted client identity for a fresh credential.
    pub fn issue_token(&self, identity: &ClientIdentity) -> AppResult<Credential> {
        if !identity.matches(&self.trusted) {
            metrics::record_auth_failure(AuthError::InvalidClient);
            tracing::warn!(client_id = %identity.client_id, "Token requested with invalid client credentials");
            return Err(AuthError::InvalidClient.into());
        }

        let credential = codec::issue(&identity.client_id, &self.signing).map_err(|e| {
            tracing::error!(error = %e, "Failed to encode credential");
            AppError::internal("Failed to encode credential")
        })?;

        metrics::TOKENS_ISSUED_TOTAL.inc();
        tracing::info!(
            subject = %credential.subject(),
            jti = %credential.unique_id(),
            expires_at = %credential.expires_at(),
            "Credential issued"
        );

        Ok(credential)
    }

    /// Verify a presented credential against the signing material.
    pub fn authenticate(&self, token: &str) -> Result<Credential, AuthError> {
        self.authenticate_at(token, Utc::now())
    }

    pub fn authenticate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Credential, AuthError> {
        codec::verify_at(token, &self.signing, now).map_err(|e| {
            metrics::record_auth_failure(e);
            tracing::warn!(reason = e.reason(), "Credential rejected");
            e
        })
    }
}
