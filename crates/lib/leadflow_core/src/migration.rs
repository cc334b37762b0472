//! One-time transfer of offline-captured leads to the hosted backend.
//!
//! Leads are the success criterion. If the lead insert fails nothing local is
//! touched and the caller may retry. History that fails to insert after the
//! leads went through is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::RemoteStore;
use crate::models::leads::{
    LeadStage, LocalHistory, LocalLead, RemoteHistory, RemoteLead, new_record_id,
};
use crate::notify::Notifier;
use crate::store::{LocalLeads, LocalStore, StoreError};

/// Remote rows built from the local store.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub leads: Vec<RemoteLead>,
    pub history: Vec<RemoteHistory>,
    /// History entries whose lead is not in the local store.
    pub orphaned_history: usize,
}

/// Map local records to remote rows owned by `target_user_id`.
///
/// Stage strings go through [`LeadStage::from_lossy`]; nothing here fails.
pub fn plan(
    leads: &[LocalLead],
    history: &[LocalHistory],
    target_user_id: &str,
) -> MigrationPlan {
    let mut ids: HashMap<i64, Uuid> = HashMap::with_capacity(leads.len());
    let remote_leads = leads
        .iter()
        .map(|lead| {
            let id = new_record_id();
            ids.insert(lead.id, id);
            RemoteLead {
                id,
                name: lead.name.clone(),
                email: lead.email.clone(),
                phone: lead.phone.clone(),
                company: lead.company.clone(),
                stage: LeadStage::from_lossy(&lead.stage),
                notes: lead.notes.clone(),
                assigned_to: target_user_id.to_string(),
                created_by: target_user_id.to_string(),
                created_at: lead.created_at,
                updated_at: lead.updated_at,
            }
        })
        .collect();

    let mut orphaned_history = 0;
    let remote_history = history
        .iter()
        .filter_map(|entry| {
            let Some(lead_id) = ids.get(&entry.lead_id) else {
                orphaned_history += 1;
                return None;
            };
            Some(RemoteHistory {
                id: new_record_id(),
                lead_id: *lead_id,
                from_stage: entry.from_stage.as_deref().map(LeadStage::from_lossy),
                to_stage: LeadStage::from_lossy(&entry.to_stage),
                notes: entry.notes.clone(),
                updated_by: target_user_id.to_string(),
                created_at: entry.created_at,
            })
        })
        .collect();

    MigrationPlan {
        leads: remote_leads,
        history: remote_history,
        orphaned_history,
    }
}

pub struct MigrationRunner {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
}

impl MigrationRunner {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            local,
            remote,
            notifier,
        }
    }

    /// Whether the local store holds any lead. Read errors count as "no".
    pub async fn check_needs_migration(&self) -> bool {
        match LocalLeads::new(self.local.as_ref()).lead_count().await {
            Ok(count) => count > 0,
            Err(e) => {
                warn!(error = %e, "could not count local leads");
                false
            }
        }
    }

    /// Move every local lead and history entry to the backend, owned by
    /// `target_user_id`. Returns whether the leads were migrated.
    pub async fn migrate(&self, target_user_id: &str) -> bool {
        let started = Utc::now();
        if target_user_id.trim().is_empty() {
            self.notifier.error("Migration failed: no target user");
            return false;
        }
        let local = LocalLeads::new(self.local.as_ref());

        let records = async { Ok::<_, StoreError>((local.leads().await?, local.history().await?)) };
        let (leads, history) = match records.await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "failed to read local store");
                self.notifier
                    .error(&format!("Migration failed: could not read local data: {e}"));
                return false;
            }
        };
        if leads.is_empty() {
            info!("no local leads to migrate");
            if !history.is_empty() {
                warn!(count = history.len(), "discarding history entries without a local lead");
                if let Err(e) = local.clear().await {
                    error!(error = %e, "failed to clear orphaned local history");
                }
            }
            self.notifier.success("Nothing to migrate");
            return true;
        }

        let plan = plan(&leads, &history, target_user_id);
        if plan.orphaned_history > 0 {
            warn!(
                count = plan.orphaned_history,
                "skipping history entries without a local lead"
            );
        }

        if let Err(e) = self.remote.insert_leads(&plan.leads).await {
            error!(error = %e, count = plan.leads.len(), "lead insert failed, local data kept");
            self.notifier
                .error(&format!("Migration failed, local data kept for retry: {e}"));
            return false;
        }

        if !plan.history.is_empty()
            && let Err(e) = self.remote.insert_history(&plan.history).await
        {
            error!(
                error = %e,
                count = plan.history.len(),
                "history insert failed, lead history not migrated"
            );
        }

        if let Err(e) = local.clear().await {
            error!(
                error = %e,
                "migrated leads could not be removed locally; migrating again would duplicate them"
            );
        }

        let elapsed_ms = (Utc::now() - started).num_milliseconds();
        info!(
            user_id = %target_user_id,
            leads = plan.leads.len(),
            history = plan.history.len(),
            elapsed_ms,
            "migration complete"
        );
        self.notifier.success(&format!(
            "Migrated {} lead{} to your account",
            plan.leads.len(),
            if plan.leads.len() == 1 { "" } else { "s" }
        ));
        true
    }
}
