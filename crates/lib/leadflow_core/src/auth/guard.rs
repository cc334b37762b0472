//! Access guard for protected resources.
//!
//! [`decide`] is the pure decision table. [`AccessGuard`] wraps it in the
//! per-mount state machine: it starts `Unresolved` and, once it reaches
//! `Granted` or `Denied`, keeps returning that outcome until a new guard is
//! created.

use std::sync::Arc;

use tracing::{debug, info};

use super::session::SessionManager;
use crate::notify::Notifier;

/// Entry points a guard redirects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRoutes {
    pub login: String,
    pub admin_login: String,
    /// Default page for authenticated users.
    pub landing: String,
}

impl Default for GuardRoutes {
    fn default() -> Self {
        Self {
            login: "/login".into(),
            admin_login: "/admin/login".into(),
            landing: "/dashboard".into(),
        }
    }
}

/// State of the admin authority check for the current profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCheck {
    Pending,
    Granted,
    Denied,
}

impl From<bool> for AdminCheck {
    fn from(granted: bool) -> Self {
        if granted {
            AdminCheck::Granted
        } else {
            AdminCheck::Denied
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardInput {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub require_admin: bool,
    /// Ignored unless `require_admin` is set.
    pub admin_check: AdminCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Show a placeholder; nothing is decided yet.
    Loading,
    Redirect {
        to: String,
        /// The user is signed in but lacks the required privilege.
        access_denied: bool,
    },
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardState {
    #[default]
    Unresolved,
    Granted,
    Denied,
}

/// Decide what a guarded resource should do for `input`.
pub fn decide(input: &GuardInput, routes: &GuardRoutes) -> GuardOutcome {
    if input.is_loading {
        return GuardOutcome::Loading;
    }
    if !input.is_authenticated {
        let to = if input.require_admin {
            &routes.admin_login
        } else {
            &routes.login
        };
        return GuardOutcome::Redirect {
            to: to.clone(),
            access_denied: false,
        };
    }
    if !input.require_admin {
        return GuardOutcome::Render;
    }
    match input.admin_check {
        AdminCheck::Pending => GuardOutcome::Loading,
        AdminCheck::Granted => GuardOutcome::Render,
        AdminCheck::Denied => GuardOutcome::Redirect {
            to: routes.landing.clone(),
            access_denied: true,
        },
    }
}

/// One mount of a guarded resource.
pub struct AccessGuard {
    routes: GuardRoutes,
    notifier: Arc<dyn Notifier>,
    state: GuardState,
    outcome: Option<GuardOutcome>,
}

impl AccessGuard {
    pub fn new(routes: GuardRoutes, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            routes,
            notifier,
            state: GuardState::Unresolved,
            outcome: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Feed the latest input. Terminal outcomes are sticky.
    pub fn evaluate(&mut self, input: &GuardInput) -> GuardOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = decide(input, &self.routes);
        match &outcome {
            GuardOutcome::Loading => return GuardOutcome::Loading,
            GuardOutcome::Render => self.state = GuardState::Granted,
            GuardOutcome::Redirect { to, access_denied } => {
                self.state = GuardState::Denied;
                if *access_denied {
                    info!(redirect = %to, "access denied");
                    self.notifier
                        .error("Access denied: administrator privileges required");
                }
            }
        }
        debug!(state = ?self.state, "guard resolved");
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Wait for `session` to settle, run the admin check if needed and
    /// return the terminal outcome.
    pub async fn check(&mut self, session: &SessionManager, require_admin: bool) -> GuardOutcome {
        let snapshot = session.settled().await;
        let mut input = GuardInput {
            is_authenticated: snapshot.is_authenticated(),
            is_loading: false,
            require_admin,
            admin_check: AdminCheck::Pending,
        };
        if require_admin && input.is_authenticated {
            input.admin_check = session.admin_capability().await.is_admin().into();
        }
        self.evaluate(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::RoleHint;
    use crate::notify::NotificationKind;
    use crate::testing::{FakeBackend, RecordingNotifier};

    fn input(is_authenticated: bool, is_loading: bool, require_admin: bool) -> GuardInput {
        GuardInput {
            is_authenticated,
            is_loading,
            require_admin,
            admin_check: AdminCheck::Pending,
        }
    }

    #[test]
    fn loading_wins_over_everything() {
        let routes = GuardRoutes::default();
        for authenticated in [false, true] {
            for require_admin in [false, true] {
                for admin_check in [AdminCheck::Pending, AdminCheck::Granted, AdminCheck::Denied] {
                    let i = GuardInput {
                        admin_check,
                        ..input(authenticated, true, require_admin)
                    };
                    assert_eq!(decide(&i, &routes), GuardOutcome::Loading);
                }
            }
        }
    }

    #[test]
    fn unauthenticated_admin_goes_to_admin_login() {
        let routes = GuardRoutes::default();
        assert_eq!(
            decide(&input(false, false, true), &routes),
            GuardOutcome::Redirect {
                to: "/admin/login".into(),
                access_denied: false
            }
        );
        assert_eq!(
            decide(&input(false, false, false), &routes),
            GuardOutcome::Redirect {
                to: "/login".into(),
                access_denied: false
            }
        );
    }

    #[test]
    fn admin_check_gates_admin_resources_only() {
        let routes = GuardRoutes::default();
        assert_eq!(decide(&input(true, false, false), &routes), GuardOutcome::Render);
        assert_eq!(decide(&input(true, false, true), &routes), GuardOutcome::Loading);

        let denied = GuardInput {
            admin_check: AdminCheck::Denied,
            ..input(true, false, true)
        };
        assert_eq!(
            decide(&denied, &routes),
            GuardOutcome::Redirect {
                to: "/dashboard".into(),
                access_denied: true
            }
        );
    }

    #[test]
    fn terminal_state_is_sticky_and_notifies_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut guard = AccessGuard::new(GuardRoutes::default(), notifier.clone());

        assert_eq!(guard.evaluate(&input(true, true, true)), GuardOutcome::Loading);
        assert_eq!(guard.state(), GuardState::Unresolved);

        let denied = GuardInput {
            admin_check: AdminCheck::Denied,
            ..input(true, false, true)
        };
        assert!(matches!(guard.evaluate(&denied), GuardOutcome::Redirect { .. }));
        assert_eq!(guard.state(), GuardState::Denied);

        // A later grant does not reopen this mount.
        let granted = GuardInput {
            admin_check: AdminCheck::Granted,
            ..denied
        };
        assert!(matches!(guard.evaluate(&granted), GuardOutcome::Redirect { .. }));
        assert_eq!(notifier.kinds(), vec![NotificationKind::Error]);
    }

    #[tokio::test]
    async fn check_uses_authority_not_role_hint() {
        let backend = FakeBackend::new();
        backend.add_user("u1", "u1@example.com", "Mallory", RoleHint::Admin);
        backend.set_current_session(Some(backend.session_for("u1")));
        let notifier = Arc::new(RecordingNotifier::default());
        let session = SessionManager::start(backend.clone(), backend.clone(), notifier.clone());

        let mut guard = AccessGuard::new(GuardRoutes::default(), notifier.clone());
        let outcome = guard.check(&session, true).await;
        assert_eq!(
            outcome,
            GuardOutcome::Redirect {
                to: "/dashboard".into(),
                access_denied: true
            }
        );

        backend.grant_admin("u1");
        let mut fresh = AccessGuard::new(GuardRoutes::default(), notifier);
        session.refresh_profile().await;
        assert_eq!(fresh.check(&session, true).await, GuardOutcome::Render);
        assert_eq!(fresh.state(), GuardState::Granted);
    }
}
