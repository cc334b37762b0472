//! Local embedded store for offline capture.
//!
//! Records live in named collections and are addressed by auto-increment
//! ids. Bodies are JSON; typed access goes through [`LocalLeads`].

pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::leads::{LocalHistory, LocalLead};

pub use sqlite::SqliteStore;

/// Local store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Record {id} not found in {collection}")]
    NotFound { collection: Collection, id: i64 },
}

/// Logical collections in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Leads,
    LeadHistory,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Leads => "leads",
            Collection::LeadHistory => "lead_history",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// A stored record: local id plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub body: Value,
}

/// Object store addressed by auto-increment id, namespaced per collection.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert a record, returning its new id.
    async fn add(&self, collection: Collection, body: &Value) -> Result<i64, StoreError>;

    /// All records in id order.
    async fn get_all(&self, collection: Collection) -> Result<Vec<StoredRecord>, StoreError>;

    async fn get_by_id(
        &self,
        collection: Collection,
        id: i64,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Replace the body of an existing record.
    async fn update(&self, collection: Collection, id: i64, body: &Value)
    -> Result<(), StoreError>;

    /// Delete a record. Deleting a missing id is not an error.
    async fn delete(&self, collection: Collection, id: i64) -> Result<(), StoreError>;

    async fn clear(&self, collection: Collection) -> Result<(), StoreError>;

    /// Clear several collections in one transaction: all or none.
    async fn clear_all(&self, collections: &[Collection]) -> Result<(), StoreError>;

    async fn count(&self, collection: Collection) -> Result<i64, StoreError>;
}

/// Typed lead and lead-history access over a [`LocalStore`].
pub struct LocalLeads<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> LocalLeads<'a> {
    pub fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    pub async fn add_lead(&self, lead: &LocalLead) -> Result<i64, StoreError> {
        self.store
            .add(Collection::Leads, &serde_json::to_value(lead)?)
            .await
    }

    pub async fn leads(&self) -> Result<Vec<LocalLead>, StoreError> {
        self.store
            .get_all(Collection::Leads)
            .await?
            .into_iter()
            .map(decode_lead)
            .collect()
    }

    pub async fn lead(&self, id: i64) -> Result<Option<LocalLead>, StoreError> {
        self.store
            .get_by_id(Collection::Leads, id)
            .await?
            .map(decode_lead)
            .transpose()
    }

    pub async fn update_lead(&self, lead: &LocalLead) -> Result<(), StoreError> {
        self.store
            .update(Collection::Leads, lead.id, &serde_json::to_value(lead)?)
            .await
    }

    pub async fn delete_lead(&self, id: i64) -> Result<(), StoreError> {
        self.store.delete(Collection::Leads, id).await
    }

    pub async fn add_history(&self, entry: &LocalHistory) -> Result<i64, StoreError> {
        self.store
            .add(Collection::LeadHistory, &serde_json::to_value(entry)?)
            .await
    }

    pub async fn history(&self) -> Result<Vec<LocalHistory>, StoreError> {
        self.store
            .get_all(Collection::LeadHistory)
            .await?
            .into_iter()
            .map(|record| {
                let mut entry: LocalHistory = serde_json::from_value(record.body)?;
                entry.id = record.id;
                Ok(entry)
            })
            .collect()
    }

    pub async fn lead_count(&self) -> Result<i64, StoreError> {
        self.store.count(Collection::Leads).await
    }

    /// Drop every local lead and history entry.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store
            .clear_all(&[Collection::Leads, Collection::LeadHistory])
            .await
    }
}

fn decode_lead(record: StoredRecord) -> Result<LocalLead, StoreError> {
    let mut lead: LocalLead = serde_json::from_value(record.body)?;
    lead.id = record.id;
    Ok(lead)
}
