//! In-memory fakes of the backend seams for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::backend::{AuthProvider, BackendError, RemoteStore};
use crate::models::auth::{AuthEvent, Identity, Profile, RoleHint, Session};
use crate::models::leads::{LeadPatch, RemoteHistory, RemoteLead};
use crate::notify::{Notification, NotificationKind, Notifier};

/// Password every fake user is created with.
pub const TEST_PASSWORD: &str = "password123";

#[derive(Default)]
struct State {
    profiles: HashMap<String, Profile>,
    passwords: HashMap<String, String>,
    admins: HashSet<String>,
    current_session: Option<Session>,
    session_delay: Option<Duration>,
    fail_session_query: bool,
    require_email_confirmation: bool,
    sign_in_attempts: usize,
    cleared_sessions: usize,
    profile_delays: HashMap<String, Duration>,
    fail_profile_fetch: bool,
    profile_fetches: usize,
    fail_admin_check: bool,
    admin_checks: usize,
    leads: Vec<RemoteLead>,
    history: Vec<RemoteHistory>,
    fail_lead_insert: bool,
    fail_history_insert: bool,
}

/// Scriptable auth provider and remote store.
pub struct FakeBackend {
    state: Mutex<State>,
    events: broadcast::Sender<AuthEvent>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Mutex::new(State::default()),
            events,
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_user(&self, id: &str, email: &str, name: &str, role_hint: RoleHint) {
        self.with(|s| {
            s.profiles.insert(
                id.into(),
                Profile {
                    id: id.into(),
                    name: Some(name.into()),
                    email: Some(email.into()),
                    role_hint,
                },
            );
            s.passwords.insert(email.into(), TEST_PASSWORD.into());
        });
    }

    /// A fresh session for a known user.
    pub fn session_for(&self, id: &str) -> Session {
        let email = self.with(|s| s.profiles.get(id).and_then(|p| p.email.clone()));
        let now = Utc::now();
        Session {
            identity: Identity {
                id: id.into(),
                email,
            },
            access_token: format!("access-{id}"),
            refresh_token: format!("refresh-{id}"),
            expires_at: now + chrono::Duration::hours(1),
            issued_at: now,
        }
    }

    /// Push an auth event to subscribers, as the provider would.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_current_session(&self, session: Option<Session>) {
        self.with(|s| s.current_session = session);
    }

    pub fn set_session_delay(&self, delay: Duration) {
        self.with(|s| s.session_delay = Some(delay));
    }

    pub fn fail_session_query(&self, fail: bool) {
        self.with(|s| s.fail_session_query = fail);
    }

    pub fn require_email_confirmation(&self, required: bool) {
        self.with(|s| s.require_email_confirmation = required);
    }

    pub fn sign_in_attempts(&self) -> usize {
        self.with(|s| s.sign_in_attempts)
    }

    pub fn cleared_sessions(&self) -> usize {
        self.with(|s| s.cleared_sessions)
    }

    pub fn set_profile_delay(&self, id: &str, delay: Duration) {
        self.with(|s| s.profile_delays.insert(id.into(), delay));
    }

    pub fn fail_profile_fetch(&self, fail: bool) {
        self.with(|s| s.fail_profile_fetch = fail);
    }

    pub fn profile_fetches(&self) -> usize {
        self.with(|s| s.profile_fetches)
    }

    pub fn grant_admin(&self, id: &str) {
        self.with(|s| s.admins.insert(id.into()));
    }

    pub fn revoke_admin(&self, id: &str) {
        self.with(|s| s.admins.remove(id));
    }

    pub fn fail_admin_check(&self, fail: bool) {
        self.with(|s| s.fail_admin_check = fail);
    }

    pub fn admin_checks(&self) -> usize {
        self.with(|s| s.admin_checks)
    }

    pub fn fail_lead_insert(&self, fail: bool) {
        self.with(|s| s.fail_lead_insert = fail);
    }

    pub fn fail_history_insert(&self, fail: bool) {
        self.with(|s| s.fail_history_insert = fail);
    }

    pub fn leads(&self) -> Vec<RemoteLead> {
        self.with(|s| s.leads.clone())
    }

    pub fn history(&self) -> Vec<RemoteHistory> {
        self.with(|s| s.history.clone())
    }

    pub fn profile(&self, id: &str) -> Option<Profile> {
        self.with(|s| s.profiles.get(id).cloned())
    }

    fn server_error() -> BackendError {
        BackendError::Status {
            status: 500,
            message: "injected failure".into(),
        }
    }
}

#[async_trait]
impl AuthProvider for FakeBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let delay = self.with(|s| s.session_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            if s.fail_session_query {
                return Err(Self::server_error());
            }
            Ok(s.current_session.clone())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let user_id = self.with(|s| {
            s.sign_in_attempts += 1;
            let matches = s.passwords.get(email).is_some_and(|p| p == password);
            s.profiles
                .values()
                .find(|p| matches && p.email.as_deref() == Some(email))
                .map(|p| p.id.clone())
        });
        let Some(user_id) = user_id else {
            return Err(BackendError::Unauthorized("Invalid login credentials".into()));
        };
        let session = self.session_for(&user_id);
        self.set_current_session(Some(session.clone()));
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Option<Session>, BackendError> {
        let id = Uuid::new_v4().to_string();
        let confirm = self.with(|s| {
            s.profiles.insert(
                id.clone(),
                Profile {
                    id: id.clone(),
                    name: name.map(str::to_string),
                    email: Some(email.into()),
                    role_hint: RoleHint::User,
                },
            );
            s.passwords.insert(email.into(), password.into());
            s.require_email_confirmation
        });
        if confirm {
            return Ok(None);
        }
        let session = self.session_for(&id);
        self.set_current_session(Some(session.clone()));
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.set_current_session(None);
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn clear_session(&self) {
        self.with(|s| s.cleared_sessions += 1);
        self.set_current_session(None);
        self.emit(AuthEvent::SignedOut);
    }

    async fn reset_password_for_email(&self, _email: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), BackendError> {
        self.with(|s| {
            match s
                .current_session
                .as_ref()
                .and_then(|session| session.identity.email.clone())
            {
                Some(email) => {
                    s.passwords.insert(email, new_password.into());
                    Ok(())
                }
                None => Err(BackendError::NoSession),
            }
        })
    }
}

#[async_trait]
impl RemoteStore for FakeBackend {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
        let delay = self.with(|s| {
            s.profile_fetches += 1;
            s.profile_delays.get(user_id).copied()
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            if s.fail_profile_fetch {
                return Err(Self::server_error());
            }
            Ok(s.profiles.get(user_id).cloned())
        })
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, BackendError> {
        let mut profiles: Vec<Profile> = self.with(|s| s.profiles.values().cloned().collect());
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(profiles)
    }

    async fn update_profile_role(
        &self,
        user_id: &str,
        role: RoleHint,
    ) -> Result<(), BackendError> {
        self.with(|s| match s.profiles.get_mut(user_id) {
            Some(profile) => {
                profile.role_hint = role;
                Ok(())
            }
            None => Err(BackendError::NotFound(format!("profile {user_id}"))),
        })
    }

    async fn is_admin_user(&self, user_id: &str) -> Result<bool, BackendError> {
        self.with(|s| {
            s.admin_checks += 1;
            if s.fail_admin_check {
                return Err(Self::server_error());
            }
            Ok(s.admins.contains(user_id))
        })
    }

    async fn list_leads(&self) -> Result<Vec<RemoteLead>, BackendError> {
        Ok(self.leads())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<RemoteLead>, BackendError> {
        Ok(self.with(|s| s.leads.iter().find(|l| l.id == id).cloned()))
    }

    async fn insert_leads(&self, leads: &[RemoteLead]) -> Result<(), BackendError> {
        self.with(|s| {
            if s.fail_lead_insert {
                return Err(Self::server_error());
            }
            s.leads.extend_from_slice(leads);
            Ok(())
        })
    }

    async fn update_lead(&self, id: Uuid, patch: &LeadPatch) -> Result<RemoteLead, BackendError> {
        self.with(|s| {
            let lead = s
                .leads
                .iter_mut()
                .find(|l| l.id == id)
                .ok_or_else(|| BackendError::NotFound(format!("lead {id}")))?;
            if let Some(name) = &patch.name {
                lead.name = name.clone();
            }
            if let Some(email) = &patch.email {
                lead.email = Some(email.clone());
            }
            if let Some(phone) = &patch.phone {
                lead.phone = Some(phone.clone());
            }
            if let Some(company) = &patch.company {
                lead.company = Some(company.clone());
            }
            if let Some(stage) = patch.stage {
                lead.stage = stage;
            }
            if let Some(notes) = &patch.notes {
                lead.notes = Some(notes.clone());
            }
            if let Some(updated_at) = patch.updated_at {
                lead.updated_at = updated_at;
            }
            Ok(lead.clone())
        })
    }

    async fn delete_lead(&self, id: Uuid) -> Result<(), BackendError> {
        self.with(|s| s.leads.retain(|l| l.id != id));
        Ok(())
    }

    async fn insert_history(&self, entries: &[RemoteHistory]) -> Result<(), BackendError> {
        self.with(|s| {
            if s.fail_history_insert {
                return Err(Self::server_error());
            }
            s.history.extend_from_slice(entries);
            Ok(())
        })
    }

    async fn list_history(&self, lead_id: Uuid) -> Result<Vec<RemoteHistory>, BackendError> {
        Ok(self.with(|s| {
            s.history
                .iter()
                .filter(|h| h.lead_id == lead_id)
                .cloned()
                .collect()
        }))
    }
}

/// Notifier that records everything it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notifications().into_iter().map(|n| n.kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}
