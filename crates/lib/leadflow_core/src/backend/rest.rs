//! HTTP client for the hosted backend (GoTrue-style auth + PostgREST-style
//! tables).
//!
//! The client owns the current session: it persists it through the injected
//! [`KeyValueStorage`], refreshes it when expired, and broadcasts an
//! [`AuthEvent`] whenever it changes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::token::{TokenGrant, session_from_grant};
use super::{AuthProvider, BackendError, RemoteStore};
use crate::config::{ClientConfig, ConfigError};
use crate::models::auth::{AuthEvent, Profile, RoleHint, Session};
use crate::models::leads::{LeadPatch, RemoteHistory, RemoteLead};
use crate::storage::KeyValueStorage;

/// Storage key of the persisted session.
pub const SESSION_STORAGE_KEY: &str = "leadflow.auth.session";

/// Seconds before expiry at which a stored session is refreshed.
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// Capacity of the auth event channel. Slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 32;

const PROFILE_COLUMNS: &str = "id,name,email,role";

/// Hosted backend client.
pub struct HostedBackend {
    client: Client,
    base_url: Url,
    anon_key: String,
    storage: Arc<dyn KeyValueStorage>,
    session: RwLock<Option<Session>>,
    /// Serializes refreshes so a refresh token is spent once.
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<AuthEvent>,
}

impl HostedBackend {
    pub fn new(config: &ClientConfig, storage: Arc<dyn KeyValueStorage>) -> Result<Self, ConfigError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            client: Client::new(),
            base_url: config.backend_base_url()?,
            anon_key: config.anon_key.clone(),
            storage,
            session: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            events,
        })
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Decode(format!("bad endpoint '{path}': {e}")))
    }

    fn request_with(
        &self,
        method: Method,
        path: &str,
        bearer: &str,
    ) -> Result<RequestBuilder, BackendError> {
        Ok(self
            .client
            .request(method, self.url(path)?)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer))
    }

    /// Request to the auth endpoints, which only need the anon key.
    fn anon_request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        self.request_with(method, path, &self.anon_key)
    }

    /// Request carrying the session token (or the anon key when signed out).
    /// An expired session is refreshed first.
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BackendError> {
        match self.fresh_session().await? {
            Some(session) => self.request_with(method, path, &session.access_token),
            None => self.anon_request(method, path),
        }
    }

    /// Like [`HostedBackend::request`] but fails when nobody is signed in.
    async fn authed_request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<RequestBuilder, BackendError> {
        let session = self.fresh_session().await?.ok_or(BackendError::NoSession)?;
        self.request_with(method, path, &session.access_token)
    }

    // -----------------------------------------------------------------------
    // Session bookkeeping
    // -----------------------------------------------------------------------

    /// Install `session` in memory and storage, then broadcast `event`.
    async fn install(&self, session: Option<Session>, event: AuthEvent) {
        match &session {
            Some(s) => match serde_json::to_string(s) {
                Ok(raw) => {
                    if let Err(e) = self.storage.set(SESSION_STORAGE_KEY, &raw) {
                        warn!(error = %e, "failed to persist session");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode session"),
            },
            None => {
                if let Err(e) = self.storage.remove(SESSION_STORAGE_KEY) {
                    warn!(error = %e, "failed to remove persisted session");
                }
            }
        }
        *self.session.write().await = session;
        debug!(event = event.name(), "auth state changed");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn load_stored_session(&self) -> Option<Session> {
        let raw = match self.storage.get(SESSION_STORAGE_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "failed to read persisted session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session");
                let _ = self.storage.remove(SESSION_STORAGE_KEY);
                None
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        #[derive(Serialize)]
        struct Body<'a> {
            refresh_token: &'a str,
        }
        let request = self
            .anon_request(Method::POST, "auth/v1/token")?
            .query(&[("grant_type", "refresh_token")])
            .json(&Body { refresh_token });
        let grant: TokenGrant = read_json(request.send().await?).await?;
        session_from_grant(grant, Utc::now())
    }

    /// Current session, refreshed when it is within the expiry leeway. A
    /// refresh the backend rejects signs out locally.
    async fn fresh_session(&self) -> Result<Option<Session>, BackendError> {
        if let Some(session) = self.live_session().await {
            return Ok(Some(session));
        }
        let _refreshing = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(session) = self.live_session().await {
            return Ok(Some(session));
        }
        let current = self.session.read().await.clone();
        let Some(stale) = current.or_else(|| self.load_stored_session()) else {
            return Ok(None);
        };

        match self.refresh(&stale.refresh_token).await {
            Ok(fresh) => {
                info!(user_id = %fresh.user_id(), "refreshed expired session");
                self.install(Some(fresh.clone()), AuthEvent::TokenRefreshed(fresh.clone()))
                    .await;
                Ok(Some(fresh))
            }
            Err(BackendError::Unauthorized(reason)) => {
                warn!(%reason, "stored session rejected, signing out locally");
                self.install(None, AuthEvent::SignedOut).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The in-memory or stored session when it is still usable as is.
    async fn live_session(&self) -> Option<Session> {
        let current = self.session.read().await.clone();
        let session = current.or_else(|| self.load_stored_session())?;
        if session.is_expired(Utc::now(), EXPIRY_LEEWAY_SECS) {
            return None;
        }
        let mut slot = self.session.write().await;
        if slot.is_none() {
            *slot = Some(session.clone());
        }
        Some(session)
    }

    // -----------------------------------------------------------------------
    // Table helpers
    // -----------------------------------------------------------------------

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, BackendError> {
        let request = self
            .request(Method::GET, &format!("rest/v1/{table}"))
            .await?
            .query(query);
        read_json(request.send().await?).await
    }

    async fn insert<T: Serialize + Sync>(&self, table: &str, rows: &[T]) -> Result<(), BackendError> {
        if rows.is_empty() {
            return Ok(());
        }
        let request = self
            .request(Method::POST, &format!("rest/v1/{table}"))
            .await?
            .header("Prefer", "return=minimal")
            .json(rows);
        expect_success(request.send().await?).await
    }
}

#[async_trait]
impl AuthProvider for HostedBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.fresh_session().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        #[derive(Serialize)]
        struct Body<'a> {
            email: &'a str,
            password: &'a str,
        }
        let request = self
            .anon_request(Method::POST, "auth/v1/token")?
            .query(&[("grant_type", "password")])
            .json(&Body { email, password });
        let grant: TokenGrant = read_json(request.send().await?).await?;
        let session = session_from_grant(grant, Utc::now())?;
        info!(user_id = %session.user_id(), "signed in");
        self.install(Some(session.clone()), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Option<Session>, BackendError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "name": name },
        });
        let request = self.anon_request(Method::POST, "auth/v1/signup")?.json(&body);
        let value: serde_json::Value = read_json(request.send().await?).await?;

        // Without email confirmation the backend answers with a full grant;
        // otherwise only the pending user comes back.
        if value.get("access_token").is_none() {
            info!(%email, "registered, awaiting email confirmation");
            return Ok(None);
        }
        let grant: TokenGrant =
            serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = session_from_grant(grant, Utc::now())?;
        info!(user_id = %session.user_id(), "registered and signed in");
        self.install(Some(session.clone()), AuthEvent::SignedIn(session.clone()))
            .await;
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.session.read().await.is_some() {
            let outcome = match self.authed_request(Method::POST, "auth/v1/logout").await {
                Ok(request) => match request.send().await {
                    Ok(response) => expect_success(response).await,
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            };
            // The local session goes away regardless.
            if let Err(e) = outcome {
                warn!(error = %e, "remote sign-out failed");
            }
        }
        self.install(None, AuthEvent::SignedOut).await;
        Ok(())
    }

    async fn clear_session(&self) {
        debug!("dropping local session");
        self.install(None, AuthEvent::SignedOut).await;
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError> {
        let request = self
            .anon_request(Method::POST, "auth/v1/recover")?
            .json(&serde_json::json!({ "email": email }));
        expect_success(request.send().await?).await
    }

    async fn update_password(&self, new_password: &str) -> Result<(), BackendError> {
        let request = self
            .authed_request(Method::PUT, "auth/v1/user")
            .await?
            .json(&serde_json::json!({ "password": new_password }));
        expect_success(request.send().await?).await?;
        if let Some(session) = self.session.read().await.clone() {
            let _ = self.events.send(AuthEvent::UserUpdated(session));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for HostedBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let rows: Vec<Profile> = self
            .select(
                "profiles",
                &[
                    ("id", format!("eq.{user_id}")),
                    ("select", PROFILE_COLUMNS.to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError> {
        self.select(
            "profiles",
            &[
                ("select", PROFILE_COLUMNS.to_string()),
                ("order", "email.asc".to_string()),
            ],
        )
        .await
    }

    async fn update_profile_role(
        &self,
        user_id: &str,
        role: RoleHint,
    ) -> Result<(), BackendError> {
        let request = self
            .authed_request(Method::PATCH, "rest/v1/profiles")
            .await?
            .query(&[("id", format!("eq.{user_id}"))])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "role": role }));
        let rows: Vec<Profile> = read_json(request.send().await?).await?;
        if rows.is_empty() {
            return Err(BackendError::NotFound(format!("profile {user_id}")));
        }
        Ok(())
    }

    async fn is_admin_user(&self, user_id: &str) -> Result<bool, BackendError> {
        let request = self
            .request(Method::POST, "rest/v1/rpc/is_admin_user")
            .await?
            .json(&serde_json::json!({ "user_id": user_id }));
        read_json(request.send().await?).await
    }

    async fn list_leads(&self) -> Result<Vec<RemoteLead>, BackendError> {
        self.select(
            "leads",
            &[
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<RemoteLead>, BackendError> {
        let rows: Vec<RemoteLead> = self
            .select(
                "leads",
                &[("id", format!("eq.{id}")), ("select", "*".to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_leads(&self, leads: &[RemoteLead]) -> Result<(), BackendError> {
        self.insert("leads", leads).await
    }

    async fn update_lead(&self, id: Uuid, patch: &LeadPatch) -> Result<RemoteLead, BackendError> {
        let request = self
            .request(Method::PATCH, "rest/v1/leads")
            .await?
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(patch);
        let rows: Vec<RemoteLead> = read_json(request.send().await?).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("lead {id}")))
    }

    async fn delete_lead(&self, id: Uuid) -> Result<(), BackendError> {
        let request = self
            .request(Method::DELETE, "rest/v1/leads")
            .await?
            .query(&[("id", format!("eq.{id}"))]);
        expect_success(request.send().await?).await
    }

    async fn insert_history(&self, entries: &[RemoteHistory]) -> Result<(), BackendError> {
        self.insert("lead_history", entries).await
    }

    async fn list_history(&self, lead_id: Uuid) -> Result<Vec<RemoteHistory>, BackendError> {
        self.select(
            "lead_history",
            &[
                ("lead_id", format!("eq.{lead_id}")),
                ("select", "*".to_string()),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

async fn expect_success(response: Response) -> Result<(), BackendError> {
    check_status(response).await.map(|_| ())
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    Err(classify(status, body.contains("invalid_grant"), message))
}

/// Map a failed response onto the error taxonomy.
///
/// Auth endpoints answer bad credentials with `400 invalid_grant`; treat that
/// like `401` so callers see an authentication error.
fn classify(status: StatusCode, invalid_grant: bool, message: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        StatusCode::BAD_REQUEST if invalid_grant => BackendError::Unauthorized(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        _ => BackendError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}
