//! Hosted backend seams.
//!
//! [`AuthProvider`] covers the auth service (sessions, sign-in, auth-state
//! events); [`RemoteStore`] covers the database tables and the admin
//! registry. [`rest::HostedBackend`] implements both over HTTP.

pub mod rest;
pub mod token;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::auth::{AuthEvent, Profile, RoleHint, Session};
use crate::models::leads::{LeadPatch, RemoteHistory, RemoteLead};
use crate::storage::StorageError;

/// Errors from the hosted backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not signed in")]
    NoSession,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Hosted authentication service.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current session, if any. Expired sessions are refreshed first.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Subscribe to auth-state changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;

    /// Register a new account. Returns `None` when the backend requires email
    /// confirmation before issuing a session.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Option<Session>, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Forget the local session without contacting the backend. Used when
    /// the backend has rejected the caller's credentials.
    async fn clear_session(&self);

    /// Send a password reset email.
    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError>;

    /// Change the signed-in user's password.
    async fn update_password(&self, new_password: &str) -> Result<(), BackendError>;
}

/// Hosted database tables and RPCs used by the client.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError>;

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError>;

    async fn update_profile_role(&self, user_id: &str, role: RoleHint)
    -> Result<(), BackendError>;

    /// Authoritative admin registry lookup (`is_admin_user` RPC).
    async fn is_admin_user(&self, user_id: &str) -> Result<bool, BackendError>;

    async fn list_leads(&self) -> Result<Vec<RemoteLead>, BackendError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<RemoteLead>, BackendError>;

    /// Bulk insert. All rows are written or none.
    async fn insert_leads(&self, leads: &[RemoteLead]) -> Result<(), BackendError>;

    async fn update_lead(&self, id: Uuid, patch: &LeadPatch) -> Result<RemoteLead, BackendError>;

    async fn delete_lead(&self, id: Uuid) -> Result<(), BackendError>;

    async fn insert_history(&self, entries: &[RemoteHistory]) -> Result<(), BackendError>;

    async fn list_history(&self, lead_id: Uuid) -> Result<Vec<RemoteHistory>, BackendError>;
}
