//! Admin privilege resolution.
//!
//! [`AdminCapability`] can only be produced here, from the remote admin
//! registry. `Profile::role_hint` is never consulted.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::RemoteStore;
use crate::models::auth::Profile;

/// Result of an authority check for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCapability {
    user_id: Option<String>,
    granted: bool,
}

impl AdminCapability {
    fn denied(user_id: Option<String>) -> Self {
        Self {
            user_id,
            granted: false,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.granted
    }

    /// The user the check was made for.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// Answers "is this profile an administrator" from the admin registry.
#[derive(Clone)]
pub struct RoleAuthority {
    store: Arc<dyn RemoteStore>,
}

impl RoleAuthority {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Check admin privilege for `profile`. Fails closed.
    pub async fn is_admin(&self, profile: Option<&Profile>) -> AdminCapability {
        let Some(id) = profile.map(|p| p.id.as_str()).filter(|id| !id.is_empty()) else {
            return AdminCapability::denied(None);
        };
        match self.store.is_admin_user(id).await {
            Ok(granted) => {
                debug!(user_id = %id, granted, "admin authority check");
                AdminCapability {
                    user_id: Some(id.to_string()),
                    granted,
                }
            }
            Err(e) => {
                warn!(user_id = %id, error = %e, "admin authority check failed");
                AdminCapability::denied(Some(id.to_string()))
            }
        }
    }
}
