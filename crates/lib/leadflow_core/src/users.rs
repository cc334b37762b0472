//! User directory: profile listing and role assignment.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::auth::authority::AdminCapability;
use crate::backend::{BackendError, RemoteStore};
use crate::models::auth::{Profile, RoleHint};
use crate::notify::Notifier;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("Administrator privileges required")]
    Forbidden,

    #[error("Invalid role: {0}")]
    InvalidRole(RoleHint),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub struct UserDirectory {
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
}

impl UserDirectory {
    pub fn new(remote: Arc<dyn RemoteStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { remote, notifier }
    }

    pub async fn list(&self) -> Result<Vec<Profile>, UserError> {
        Ok(self.remote.list_profiles().await?)
    }

    /// Change the role shown on a user's profile.
    ///
    /// Takes the caller's [`AdminCapability`]; a capability that does not
    /// grant admin is refused before anything is sent.
    pub async fn set_role(
        &self,
        capability: &AdminCapability,
        user_id: &str,
        role: RoleHint,
    ) -> Result<(), UserError> {
        let outcome = self.try_set_role(capability, user_id, role).await;
        match &outcome {
            Ok(()) => self
                .notifier
                .success(&format!("Role of {user_id} set to {role}")),
            Err(e) => self.notifier.error(&format!("Could not change role: {e}")),
        }
        outcome
    }

    async fn try_set_role(
        &self,
        capability: &AdminCapability,
        user_id: &str,
        role: RoleHint,
    ) -> Result<(), UserError> {
        if !capability.is_admin() {
            return Err(UserError::Forbidden);
        }
        if role == RoleHint::Unknown {
            return Err(UserError::InvalidRole(role));
        }
        self.remote.update_profile_role(user_id, role).await?;
        info!(
            user_id,
            role = %role,
            by = ?capability.user_id(),
            "profile role changed"
        );
        Ok(())
    }
}
