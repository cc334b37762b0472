//! Profile resolution with last-identity-wins semantics.
//!
//! Each resolution takes an epoch ticket ([`ProfileResolver::begin`]) before
//! it awaits the remote fetch. On completion the ticket is compared with the
//! current epoch; a mismatch means a newer resolution started meanwhile and
//! the result is dropped instead of applied.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backend::RemoteStore;
use crate::models::auth::Profile;

/// Outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The result became the current profile. `None` means no identity, no
    /// profile row, or a failed fetch.
    Current(Option<Profile>),
    /// A newer resolution started before this one finished.
    Superseded,
}

impl Resolution {
    pub fn is_superseded(&self) -> bool {
        matches!(self, Resolution::Superseded)
    }
}

/// A resolution that has taken its epoch ticket but not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRequest {
    ticket: u64,
    identity_id: Option<String>,
}

impl ProfileRequest {
    pub fn identity_id(&self) -> Option<&str> {
        self.identity_id.as_deref()
    }
}

#[derive(Debug, Default)]
struct Slot {
    identity_id: Option<String>,
    profile: Option<Profile>,
    resolved: bool,
}

/// Fetches display profiles for identities.
pub struct ProfileResolver {
    store: Arc<dyn RemoteStore>,
    epoch: AtomicU64,
    slot: RwLock<Slot>,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            epoch: AtomicU64::new(0),
            slot: RwLock::new(Slot::default()),
        }
    }

    /// Resolve the profile for `identity_id`.
    ///
    /// Asking again for the identity that is already resolved returns the
    /// cached profile without a fetch.
    pub async fn resolve(&self, identity_id: Option<&str>) -> Resolution {
        {
            let slot = self.slot.read().await;
            if slot.resolved && slot.identity_id.as_deref() == identity_id {
                return Resolution::Current(slot.profile.clone());
            }
        }
        self.complete(self.begin(identity_id)).await
    }

    /// Refetch the profile for `identity_id` even if it is cached.
    pub async fn refresh(&self, identity_id: Option<&str>) -> Resolution {
        self.complete(self.begin(identity_id)).await
    }

    /// Take a ticket for `identity_id`, superseding every earlier request.
    ///
    /// Synchronous so callers can order tickets with their own state changes
    /// before anything is awaited.
    pub fn begin(&self, identity_id: Option<&str>) -> ProfileRequest {
        ProfileRequest {
            ticket: self.epoch.fetch_add(1, Ordering::SeqCst) + 1,
            identity_id: identity_id.map(str::to_string),
        }
    }

    /// Fetch the profile for a request and apply it unless superseded.
    pub async fn complete(&self, request: ProfileRequest) -> Resolution {
        let ProfileRequest {
            ticket,
            identity_id,
        } = request;

        let profile = match identity_id.as_deref() {
            None => None,
            Some(id) => match self.store.fetch_profile(id).await {
                Ok(profile) => {
                    if profile.is_none() {
                        warn!(user_id = %id, "no profile row for identity");
                    }
                    profile
                }
                Err(e) => {
                    warn!(user_id = %id, error = %e, "profile fetch failed");
                    None
                }
            },
        };

        // Compare under the write lock so no newer request can apply in
        // between.
        let mut slot = self.slot.write().await;
        if self.epoch.load(Ordering::SeqCst) != ticket {
            debug!(ticket, identity_id = ?identity_id, "discarding superseded profile fetch");
            return Resolution::Superseded;
        }
        *slot = Slot {
            identity_id,
            profile: profile.clone(),
            resolved: true,
        };
        Resolution::Current(profile)
    }

    /// Current profile, if one is resolved.
    pub async fn current(&self) -> Option<Profile> {
        self.slot.read().await.profile.clone()
    }
}
