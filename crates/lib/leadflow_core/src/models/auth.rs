//! Authentication domain models.
//!
//! [`Profile`] is a display record only. Its `role_hint` never grants
//! anything; admin privilege comes from
//! [`crate::auth::authority::AdminCapability`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider subject id (`sub`).
    pub id: String,
    pub email: Option<String>,
}

/// An authenticated session issued by the hosted auth service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    /// Whether the access token is expired, allowing `leeway_secs` of clock skew.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        self.expires_at <= now + chrono::Duration::seconds(leeway_secs)
    }

    pub fn user_id(&self) -> &str {
        &self.identity.id
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Role stored on the profile row. Display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleHint {
    Admin,
    #[default]
    User,
    #[serde(other)]
    Unknown,
}

impl RoleHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleHint::Admin => "admin",
            RoleHint::User => "user",
            RoleHint::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RoleHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoleHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(RoleHint::Admin),
            "user" => Ok(RoleHint::User),
            other => Err(format!("unknown role '{other}' (expected 'admin' or 'user')")),
        }
    }
}

/// Application profile row associated with an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same as the identity id.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "role", default)]
    pub role_hint: RoleHint,
}

impl Profile {
    /// Name to show in the UI, falling back to email, then id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Auth-state change pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
}

impl AuthEvent {
    /// The session this event leaves in place (`None` after sign-out).
    pub fn into_session(self) -> Option<Session> {
        match self {
            AuthEvent::SignedIn(s) | AuthEvent::TokenRefreshed(s) | AuthEvent::UserUpdated(s) => {
                Some(s)
            }
            AuthEvent::SignedOut => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "signed_in",
            AuthEvent::SignedOut => "signed_out",
            AuthEvent::TokenRefreshed(_) => "token_refreshed",
            AuthEvent::UserUpdated(_) => "user_updated",
        }
    }
}
