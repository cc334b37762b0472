//! Remote lead management.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, RemoteStore};
use crate::models::leads::{LeadDraft, LeadPatch, LeadStage, RemoteHistory, RemoteLead, new_record_id};
use crate::notify::Notifier;

#[derive(Debug, Error)]
pub enum LeadError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Lead {0} not found")]
    NotFound(Uuid),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Lead CRUD against the hosted backend. Mutations notify exactly once.
pub struct LeadService {
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
}

impl LeadService {
    pub fn new(remote: Arc<dyn RemoteStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { remote, notifier }
    }

    pub async fn list(&self) -> Result<Vec<RemoteLead>, LeadError> {
        Ok(self.remote.list_leads().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<RemoteLead, LeadError> {
        self.remote
            .get_lead(id)
            .await?
            .ok_or(LeadError::NotFound(id))
    }

    pub async fn history(&self, lead_id: Uuid) -> Result<Vec<RemoteHistory>, LeadError> {
        Ok(self.remote.list_history(lead_id).await?)
    }

    /// Create a lead assigned to and created by `actor`.
    pub async fn create(&self, actor: &str, draft: LeadDraft) -> Result<RemoteLead, LeadError> {
        let outcome = self.try_create(actor, draft).await;
        match &outcome {
            Ok(lead) => self.notifier.success(&format!("Lead '{}' created", lead.name)),
            Err(e) => self.notifier.error(&format!("Could not create lead: {e}")),
        }
        outcome
    }

    async fn try_create(&self, actor: &str, draft: LeadDraft) -> Result<RemoteLead, LeadError> {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(LeadError::Validation("Lead name is required".into()));
        }
        require_actor(actor)?;

        let now = Utc::now();
        let lead = RemoteLead {
            id: new_record_id(),
            name: name.to_string(),
            email: non_empty(draft.email),
            phone: non_empty(draft.phone),
            company: non_empty(draft.company),
            stage: draft
                .stage
                .as_deref()
                .map(LeadStage::from_lossy)
                .unwrap_or_default(),
            notes: non_empty(draft.notes),
            assigned_to: actor.to_string(),
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.remote.insert_leads(std::slice::from_ref(&lead)).await?;
        info!(lead_id = %lead.id, stage = %lead.stage, "lead created");
        Ok(lead)
    }

    /// Apply `patch`. A stage change is recorded in the lead's history,
    /// attributed to `actor`.
    pub async fn update(
        &self,
        actor: &str,
        id: Uuid,
        patch: LeadPatch,
    ) -> Result<RemoteLead, LeadError> {
        let outcome = self.try_update(actor, id, patch).await;
        match &outcome {
            Ok(lead) => self.notifier.success(&format!("Lead '{}' updated", lead.name)),
            Err(e) => self.notifier.error(&format!("Could not update lead: {e}")),
        }
        outcome
    }

    async fn try_update(
        &self,
        actor: &str,
        id: Uuid,
        mut patch: LeadPatch,
    ) -> Result<RemoteLead, LeadError> {
        if patch.is_empty() {
            return Err(LeadError::Validation("Nothing to update".into()));
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(LeadError::Validation("Lead name is required".into()));
        }
        require_actor(actor)?;

        let current = self.get(id).await?;
        let now = Utc::now();
        patch.updated_at = Some(now);
        let updated = match self.remote.update_lead(id, &patch).await {
            Err(BackendError::NotFound(_)) => return Err(LeadError::NotFound(id)),
            other => other?,
        };

        if updated.stage != current.stage {
            let entry = RemoteHistory {
                id: new_record_id(),
                lead_id: id,
                from_stage: Some(current.stage),
                to_stage: updated.stage,
                notes: patch.notes.clone(),
                updated_by: actor.to_string(),
                created_at: now,
            };
            if let Err(e) = self.remote.insert_history(&[entry]).await {
                warn!(lead_id = %id, error = %e, "stage change not recorded in history");
            }
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), LeadError> {
        let outcome = self.remote.delete_lead(id).await.map_err(|e| match e {
            BackendError::NotFound(_) => LeadError::NotFound(id),
            other => other.into(),
        });
        match &outcome {
            Ok(()) => {
                info!(lead_id = %id, "lead deleted");
                self.notifier.success("Lead deleted");
            }
            Err(e) => self.notifier.error(&format!("Could not delete lead: {e}")),
        }
        outcome
    }
}

fn require_actor(actor: &str) -> Result<(), LeadError> {
    if actor.trim().is_empty() {
        return Err(LeadError::Validation("Sign in to manage leads".into()));
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;
    use crate::testing::{FakeBackend, RecordingNotifier};

    fn service() -> (LeadService, Arc<FakeBackend>, Arc<RecordingNotifier>) {
        let backend = FakeBackend::new();
        let notifier = Arc::new(RecordingNotifier::default());
        (
            LeadService::new(backend.clone(), notifier.clone()),
            backend,
            notifier,
        )
    }

    fn draft(name: &str, stage: Option<&str>) -> LeadDraft {
        LeadDraft {
            name: name.into(),
            company: Some("  ".into()),
            stage: stage.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_attributes_actor_and_maps_stage() {
        let (service, backend, notifier) = service();
        let lead = service.create("u1", draft(" Ada ", Some("mystery"))).await.unwrap();

        assert_eq!(lead.name, "Ada");
        assert_eq!(lead.stage, LeadStage::New);
        assert_eq!(lead.assigned_to, "u1");
        assert_eq!(lead.created_by, "u1");
        assert_eq!(lead.company, None);
        assert_eq!(backend.leads(), vec![lead]);
        assert_eq!(notifier.kinds(), vec![NotificationKind::Success]);
    }

    #[tokio::test]
    async fn create_requires_name() {
        let (service, backend, notifier) = service();
        let err = service.create("u1", draft("   ", None)).await.unwrap_err();
        assert!(matches!(err, LeadError::Validation(_)));
        assert!(backend.leads().is_empty());
        assert_eq!(notifier.kinds(), vec![NotificationKind::Error]);
    }

    #[tokio::test]
    async fn stage_change_is_recorded() {
        let (service, backend, _) = service();
        let lead = service.create("u1", draft("Ada", Some("new"))).await.unwrap();

        let patch = LeadPatch {
            stage: Some(LeadStage::Qualified),
            notes: Some("Budget confirmed".into()),
            ..Default::default()
        };
        let updated = service.update("u2", lead.id, patch).await.unwrap();
        assert_eq!(updated.stage, LeadStage::Qualified);

        let history = service.history(lead.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_stage, Some(LeadStage::New));
        assert_eq!(history[0].to_stage, LeadStage::Qualified);
        assert_eq!(history[0].updated_by, "u2");
        assert_eq!(backend.history().len(), 1);
    }

    #[tokio::test]
    async fn non_stage_update_has_no_history() {
        let (service, backend, _) = service();
        let lead = service.create("u1", draft("Ada", None)).await.unwrap();
        let patch = LeadPatch {
            phone: Some("555-0100".into()),
            ..Default::default()
        };
        service.update("u1", lead.id, patch).await.unwrap();
        assert!(backend.history().is_empty());
    }

    #[tokio::test]
    async fn history_failure_does_not_fail_update() {
        let (service, backend, notifier) = service();
        let lead = service.create("u1", draft("Ada", None)).await.unwrap();
        backend.fail_history_insert(true);

        let patch = LeadPatch {
            stage: Some(LeadStage::Won),
            ..Default::default()
        };
        assert!(service.update("u1", lead.id, patch).await.is_ok());
        assert_eq!(
            notifier.kinds(),
            vec![NotificationKind::Success, NotificationKind::Success]
        );
    }

    #[tokio::test]
    async fn update_missing_lead_is_not_found() {
        let (service, _, notifier) = service();
        let patch = LeadPatch {
            name: Some("Ghost".into()),
            ..Default::default()
        };
        let id = new_record_id();
        let err = service.update("u1", id, patch).await.unwrap_err();
        assert!(matches!(err, LeadError::NotFound(missing) if missing == id));
        assert_eq!(notifier.kinds(), vec![NotificationKind::Error]);
    }

    #[tokio::test]
    async fn delete_removes_lead() {
        let (service, backend, notifier) = service();
        let lead = service.create("u1", draft("Ada", None)).await.unwrap();
        service.delete(lead.id).await.unwrap();
        assert!(backend.leads().is_empty());
        assert!(matches!(service.get(lead.id).await, Err(LeadError::NotFound(_))));
        assert_eq!(notifier.kinds().len(), 2);
    }
}
