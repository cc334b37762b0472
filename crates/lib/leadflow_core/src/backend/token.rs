//! Access token inspection and session construction.
//!
//! The client never verifies token signatures; the backend does. Claims are
//! read only to learn the session's issue and expiry times.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use super::BackendError;
use crate::models::auth::{Identity, Session};

/// Lifetime assumed when neither the token nor the grant says otherwise.
const FALLBACK_EXPIRY_SECS: i64 = 60 * 60;

/// Claims the client cares about in a backend-issued access token.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Token grant returned by the auth endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: GrantUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Decode the claims of `token` without checking its signature or expiry.
pub fn read_claims(token: &str) -> Result<AccessClaims, BackendError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| BackendError::InvalidToken(e.to_string()))
}

/// Build a [`Session`] from a token grant.
///
/// Timing comes from the token's `iat`/`exp` claims when readable, else from
/// `expires_in` relative to `now`.
pub fn session_from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Result<Session, BackendError> {
    let claims = read_claims(&grant.access_token).ok();
    if let Some(claims) = &claims
        && claims.sub != grant.user.id
    {
        return Err(BackendError::InvalidToken(format!(
            "token subject {} does not match user {}",
            claims.sub, grant.user.id
        )));
    }

    let issued_at = claims
        .as_ref()
        .and_then(|c| c.iat)
        .and_then(timestamp)
        .unwrap_or(now);
    let expires_at = claims
        .as_ref()
        .and_then(|c| c.exp)
        .and_then(timestamp)
        .unwrap_or_else(|| {
            now + Duration::seconds(grant.expires_in.unwrap_or(FALLBACK_EXPIRY_SECS))
        });

    Ok(Session {
        identity: Identity {
            id: grant.user.id,
            email: grant
                .user
                .email
                .or_else(|| claims.and_then(|c| c.email)),
        },
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_at,
        issued_at,
    })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
