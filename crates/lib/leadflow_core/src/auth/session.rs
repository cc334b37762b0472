//! Session manager.
//!
//! Owns the client's view of "who is signed in". State lives in a
//! [`watch`] channel so every change is applied atomically and observers
//! (route guards, the CLI) can wait for it.
//!
//! Ordering rules:
//! - an identity change is applied, and its profile ticket taken, before the
//!   profile fetch is awaited;
//! - the startup session query loses to any auth event applied while it
//!   was in flight;
//! - a profile result is applied only while its identity is still current.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::authority::{AdminCapability, RoleAuthority};
use super::profile::{ProfileRequest, ProfileResolver, Resolution};
use super::{AuthError, validate_credentials, validate_email, validate_password};
use crate::backend::{AuthProvider, RemoteStore};
use crate::models::auth::{AuthEvent, Identity, Profile, Session};
use crate::notify::Notifier;

#[derive(Debug, Clone)]
struct CachedAdmin {
    profile_revision: u64,
    capability: AdminCapability,
}

/// Point-in-time view of the session state.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    session: Option<Session>,
    profile: Option<Profile>,
    /// Bumped on every identity change and every applied profile.
    profile_revision: u64,
    /// A definitive auth state (query or event) has been applied.
    resolved: bool,
    profile_pending: bool,
    /// Count of event/action applications; the startup query compares it.
    event_epoch: u64,
    admin: Option<CachedAdmin>,
}

impl SessionSnapshot {
    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(|s| &s.identity)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// True until auth state is known and, when signed in, until the profile
    /// for the current identity is resolved.
    pub fn is_loading(&self) -> bool {
        !self.resolved || self.profile_pending
    }

    fn identity_id(&self) -> Option<&str> {
        self.identity().map(|i| i.id.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    /// Startup query; `ticket` is the event epoch seen when it was issued.
    Query { ticket: u64 },
    /// Provider-pushed event or a local auth action.
    Event,
}

struct Shared {
    auth: Arc<dyn AuthProvider>,
    profiles: ProfileResolver,
    authority: RoleAuthority,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<SessionSnapshot>,
    closed: AtomicBool,
}

impl Shared {
    fn apply(self: &Arc<Self>, session: Option<Session>, source: Source) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut request: Option<ProfileRequest> = None;

        self.state.send_if_modified(|state| {
            if let Source::Query { ticket } = source
                && state.event_epoch != ticket
            {
                debug!("startup session query superseded by auth event");
                let changed = !state.resolved;
                state.resolved = true;
                return changed;
            }
            if matches!(source, Source::Event) {
                state.event_epoch += 1;
            }

            let new_id = session.as_ref().map(|s| s.identity.id.clone());
            let identity_changed = state.identity_id() != new_id.as_deref();
            state.session = session;
            state.resolved = true;

            if identity_changed {
                info!(user_id = ?new_id, "identity changed");
                state.profile = None;
                state.profile_revision += 1;
                state.admin = None;
                state.profile_pending = new_id.is_some();
                // Taken inside the state update so ticket order matches
                // identity order.
                request = Some(self.profiles.begin(new_id.as_deref()));
            }
            true
        });

        if let Some(request) = request {
            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.finish_profile(request).await });
        }
    }

    async fn finish_profile(self: Arc<Self>, request: ProfileRequest) {
        let identity_id = request.identity_id().map(str::to_string);
        let profile = match self.profiles.complete(request).await {
            Resolution::Current(profile) => profile,
            Resolution::Superseded => return,
        };
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.state.send_if_modified(|state| {
            if state.identity_id() != identity_id.as_deref() {
                debug!(user_id = ?identity_id, "dropping profile for previous identity");
                return false;
            }
            state.profile = profile;
            state.profile_pending = false;
            state.profile_revision += 1;
            state.admin = None;
            true
        });
    }

    async fn query_initial(self: Arc<Self>, ticket: u64) {
        let session = match self.auth.get_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session query failed, treating as signed out");
                None
            }
        };
        self.apply(session, Source::Query { ticket });
    }

    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<AuthEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(event = event.name(), "auth event received");
                    self.apply(event.into_session(), Source::Event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth events lagged, re-querying session");
                    let session = self.auth.get_session().await.unwrap_or_else(|e| {
                        warn!(error = %e, "session re-query failed, treating as signed out");
                        None
                    });
                    self.apply(session, Source::Event);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Tracks the signed-in identity, its profile and admin capability.
pub struct SessionManager {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionManager {
    /// Subscribe to auth events and start the initial session query.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let events = auth.subscribe();
        let shared = Arc::new(Shared {
            auth,
            profiles: ProfileResolver::new(Arc::clone(&store)),
            authority: RoleAuthority::new(store),
            notifier,
            state,
            closed: AtomicBool::new(false),
        });

        // The query counts as issued now, before any event can be applied.
        let ticket = shared.state.borrow().event_epoch;
        let listener = tokio::spawn(Arc::clone(&shared).listen(events));
        let query = tokio::spawn(Arc::clone(&shared).query_initial(ticket));

        Self {
            shared,
            tasks: vec![listener, query],
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().is_loading()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.shared.state.borrow().identity().cloned()
    }

    /// Wait until the state is no longer loading.
    pub async fn settled(&self) -> SessionSnapshot {
        let mut rx = self.shared.state.subscribe();
        let snapshot = match rx.wait_for(|s| !s.is_loading()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    /// Admin capability of the current profile.
    ///
    /// Cached per profile revision; any identity change or profile refetch
    /// forces a new authority check.
    pub async fn admin_capability(&self) -> AdminCapability {
        let (profile, revision, cached) = {
            let state = self.shared.state.borrow();
            (
                state.profile.clone(),
                state.profile_revision,
                state.admin.clone(),
            )
        };
        if let Some(cached) = cached
            && cached.profile_revision == revision
        {
            return cached.capability;
        }

        let capability = self.shared.authority.is_admin(profile.as_ref()).await;
        self.shared.state.send_if_modified(|state| {
            if state.profile_revision == revision {
                state.admin = Some(CachedAdmin {
                    profile_revision: revision,
                    capability: capability.clone(),
                });
            }
            // Internal cache only; observers need not wake up.
            false
        });
        capability
    }

    /// Refetch the current identity's profile. Invalidates the admin cache.
    pub async fn refresh_profile(&self) {
        let mut request = None;
        self.shared.state.send_if_modified(|state| {
            let Some(id) = state.identity_id().map(str::to_string) else {
                return false;
            };
            state.profile_pending = true;
            state.profile_revision += 1;
            state.admin = None;
            request = Some(self.shared.profiles.begin(Some(&id)));
            true
        });
        if let Some(request) = request {
            Arc::clone(&self.shared).finish_profile(request).await;
        }
    }

    // -----------------------------------------------------------------------
    // User-triggered actions. Each reports exactly one notification.
    // -----------------------------------------------------------------------

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let outcome = self.try_sign_in(email, password).await;
        match &outcome {
            Ok(identity) => self.shared.notifier.success(&format!(
                "Signed in as {}",
                identity.email.as_deref().unwrap_or(&identity.id)
            )),
            Err(e) => self.shared.notifier.error(&format!("Sign-in failed: {e}")),
        }
        outcome
    }

    async fn try_sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        validate_credentials(email, password)?;
        match self
            .shared
            .auth
            .sign_in_with_password(email.trim(), password)
            .await
        {
            Ok(session) => {
                let identity = session.identity.clone();
                self.shared.apply(Some(session), Source::Event);
                Ok(identity)
            }
            Err(e) => {
                let err = AuthError::from(e);
                if matches!(err, AuthError::CredentialError | AuthError::TokenError(_)) {
                    self.shared.auth.clear_session().await;
                    self.shared.apply(None, Source::Event);
                }
                Err(err)
            }
        }
    }

    /// Register an account. `Ok(None)` means the backend wants the email
    /// confirmed before it issues a session.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Option<Identity>, AuthError> {
        let outcome = self.try_sign_up(email, password, name).await;
        match &outcome {
            Ok(Some(_)) => self.shared.notifier.success("Registration successful"),
            Ok(None) => self
                .shared
                .notifier
                .success("Registration successful, check your email to confirm the account"),
            Err(e) => self.shared.notifier.error(&format!("Registration failed: {e}")),
        }
        outcome
    }

    async fn try_sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Option<Identity>, AuthError> {
        validate_credentials(email, password)?;
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let session = self.shared.auth.sign_up(email.trim(), password, name).await?;
        let identity = session.as_ref().map(|s| s.identity.clone());
        if session.is_some() {
            self.shared.apply(session, Source::Event);
        }
        Ok(identity)
    }

    /// Sign out. Local state is cleared even when the backend call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let outcome = self.shared.auth.sign_out().await.map_err(AuthError::from);
        self.shared.apply(None, Source::Event);
        match &outcome {
            Ok(()) => self.shared.notifier.success("Signed out"),
            Err(e) => self.shared.notifier.error(&format!("Sign-out failed: {e}")),
        }
        outcome
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let outcome = match validate_email(email) {
            Ok(()) => self
                .shared
                .auth
                .reset_password_for_email(email.trim())
                .await
                .map_err(AuthError::from),
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(()) => self.shared.notifier.success("Password reset email sent"),
            Err(e) => self
                .shared
                .notifier
                .error(&format!("Password reset failed: {e}")),
        }
        outcome
    }

    pub async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let outcome = self.try_update_password(new_password).await;
        match &outcome {
            Ok(()) => self.shared.notifier.success("Password updated"),
            Err(e) => self
                .shared
                .notifier
                .error(&format!("Password update failed: {e}")),
        }
        outcome
    }

    async fn try_update_password(&self, new_password: &str) -> Result<(), AuthError> {
        if !self.snapshot().is_authenticated() {
            return Err(AuthError::NotSignedIn);
        }
        validate_password(new_password)?;
        self.shared.auth.update_password(new_password).await?;
        Ok(())
    }

    /// Stop reacting to auth events. Later results are ignored.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
