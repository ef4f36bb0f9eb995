//! Credential codec: HS256-signed JWTs carrying the client claims.
//!
//! Pure functions over [`SigningMaterial`]; nothing here touches shared state.
//! Validation uses zero clock skew: a token is valid for `now` in
//! `[issued_at, expires_at)` at one-second resolution.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{SigningMaterial, SECONDS_PER_MINUTE};
use crate::error::{AuthError, IssueError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // client id
    pub jti: String, // unique per token
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// A signed, time-bounded claim of identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    subject: String,
    unique_id: String,
    issuer: String,
    audience: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Credential {
    fn from_claims(token: String, claims: Claims) -> Result<Self, AuthError> {
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or(AuthError::BadSignature)?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(AuthError::BadSignature)?;

        Ok(Self {
            token,
            subject: claims.sub,
            unique_id: claims.jti,
            issuer: claims.iss,
            audience: claims.aud,
            issued_at,
            expires_at,
        })
    }

    /// Serialized form handed to clients
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn into_token(self) -> String {
        self.token
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.subject)
            .field("unique_id", &self.unique_id)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Lifetime of a credential minted with `ttl_minutes`, `None` if it overflows.
pub fn token_lifetime(ttl_minutes: i64) -> Option<Duration> {
    ttl_minutes
        .checked_mul(SECONDS_PER_MINUTE)
        .and_then(Duration::try_seconds)
}

/// Issue a credential for `subject` valid from now for the configured TTL.
pub fn issue(subject: &str, material: &SigningMaterial) -> Result<Credential, IssueError> {
    issue_at(subject, material, Utc::now(), Uuid::new_v4())
}

/// Deterministic issuance for a fixed clock reading and token id.
pub fn issue_at(
    subject: &str,
    material: &SigningMaterial,
    now: DateTime<Utc>,
    unique_id: Uuid,
) -> Result<Credential, IssueError> {
    let out_of_range = || IssueError::LifetimeOutOfRange(material.ttl_minutes);
    let iat = now.timestamp();
    let exp = token_lifetime(material.ttl_minutes)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(out_of_range)?
        .timestamp();

    let claims = Claims {
        sub: subject.to_string(),
        jti: unique_id.to_string(),
        iss: material.issuer.clone(),
        aud: material.audience.clone(),
        iat,
        nbf: iat,
        exp,
    };

    let header = Header::new(Algorithm::HS256);
    let token = encode(&header, &claims, &EncodingKey::from_secret(&material.key))?;

    Credential::from_claims(token, claims).map_err(|_| out_of_range())
}

/// Verify a serialized credential against the signing material and the current time.
pub fn verify(token: &str, material: &SigningMaterial) -> Result<Credential, AuthError> {
    verify_at(token, material, Utc::now())
}

/// Verify a serialized credential at a fixed clock reading.
pub fn verify_at(
    token: &str,
    material: &SigningMaterial,
    now: DateTime<Utc>,
) -> Result<Credential, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[material.issuer.as_str()]);
    validation.set_audience(&[material.audience.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    // Lifetime is checked below against the injected clock
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.leeway = 0;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(&material.key), &validation)
        .map_err(|e| classify(e.kind()))?;
    let claims = data.claims;

    let now = now.timestamp();
    if now < claims.iat {
        return Err(AuthError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(AuthError::Expired);
    }

    Credential::from_claims(token.to_string(), claims)
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        // Malformed, mis-encoded or forged tokens are indistinguishable to callers
        _ => AuthError::BadSignature,
    }
}
