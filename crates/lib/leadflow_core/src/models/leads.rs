//! Lead domain models, local (offline capture) and remote.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStage {
    #[default]
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl LeadStage {
    pub const ALL: [LeadStage; 7] = [
        LeadStage::New,
        LeadStage::Contacted,
        LeadStage::Qualified,
        LeadStage::Proposal,
        LeadStage::Negotiation,
        LeadStage::Won,
        LeadStage::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStage::New => "new",
            LeadStage::Contacted => "contacted",
            LeadStage::Qualified => "qualified",
            LeadStage::Proposal => "proposal",
            LeadStage::Negotiation => "negotiation",
            LeadStage::Won => "won",
            LeadStage::Lost => "lost",
        }
    }

    /// Exact match against the canonical stage names.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// Total mapping: anything that is not a canonical stage name becomes
    /// [`LeadStage::New`].
    pub fn from_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

impl fmt::Display for LeadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lead captured offline in the local store.
///
/// `stage` is kept as the raw string that was entered; it is only
/// validated when the record leaves the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalLead {
    /// Local auto-increment id. Not part of the stored body.
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stage change recorded offline against a [`LocalLead`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalHistory {
    #[serde(skip)]
    pub id: i64,
    /// Local id of the lead this entry belongs to.
    pub lead_id: i64,
    #[serde(default)]
    pub from_stage: Option<String>,
    pub to_stage: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lead row in the remote `leads` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLead {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub stage: LeadStage,
    pub notes: Option<String>,
    pub assigned_to: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row in the remote `lead_history` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHistory {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub from_stage: Option<LeadStage>,
    pub to_stage: LeadStage,
    pub notes: Option<String>,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a lead.
#[derive(Debug, Clone, Default)]
pub struct LeadDraft {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    /// Free-form stage; unknown values become `new`.
    pub stage: Option<String>,
    pub notes: Option<String>,
}

/// Partial update of a remote lead. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeadPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<LeadStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LeadPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.company.is_none()
            && self.stage.is_none()
            && self.notes.is_none()
    }
}

/// Generate an app-side record id (UUIDv7, timestamp-sortable).
pub fn new_record_id() -> Uuid {
    Uuid::now_v7()
}
