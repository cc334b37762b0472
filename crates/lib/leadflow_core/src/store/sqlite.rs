//! SQLite-backed [`LocalStore`].

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

use super::{Collection, LocalStore, StoreError, StoredRecord};

/// Local store on a single SQLite connection.
///
/// The store assumes a single writer; two processes migrating the same file
/// at once are not coordinated.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let store = Self::connect(options).await?;
        info!(path = %path.display(), "opened local store");
        Ok(store)
    }

    /// Fresh in-memory database, mainly for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        // One long-lived connection: an in-memory database only exists for
        // as long as its connection does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn add(&self, collection: Collection, body: &Value) -> Result<i64, StoreError> {
        let sql = format!("INSERT INTO {} (body) VALUES (?)", collection.table());
        let result = sqlx::query(&sql)
            .bind(serde_json::to_string(body)?)
            .execute(&self.pool)
            .await?;
        let id = result.last_insert_rowid();
        debug!(%collection, id, "local record added");
        Ok(id)
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<StoredRecord>, StoreError> {
        let sql = format!("SELECT id, body FROM {} ORDER BY id", collection.table());
        let rows = sqlx::query_as::<_, (i64, String)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(id, body)| {
                Ok(StoredRecord {
                    id,
                    body: serde_json::from_str(&body)?,
                })
            })
            .collect()
    }

    async fn get_by_id(
        &self,
        collection: Collection,
        id: i64,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let sql = format!("SELECT body FROM {} WHERE id = ?", collection.table());
        let row = sqlx::query_scalar::<_, String>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|body| {
            Ok(StoredRecord {
                id,
                body: serde_json::from_str(&body)?,
            })
        })
        .transpose()
    }

    async fn update(
        &self,
        collection: Collection,
        id: i64,
        body: &Value,
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE {} SET body = ? WHERE id = ?", collection.table());
        let result = sqlx::query(&sql)
            .bind(serde_json::to_string(body)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { collection, id });
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: i64) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.table());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        self.clear_all(&[collection]).await
    }

    async fn clear_all(&self, collections: &[Collection]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for collection in collections {
            let sql = format!("DELETE FROM {}", collection.table());
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::models::leads::{LocalHistory, LocalLead};
    use crate::store::LocalLeads;

    #[tokio::test]
    async fn add_get_update_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.add(Collection::Leads, &json!({"n": 1})).await.unwrap();
        let record = store.get_by_id(Collection::Leads, id).await.unwrap().unwrap();
        assert_eq!(record.body, json!({"n": 1}));

        store.update(Collection::Leads, id, &json!({"n": 2})).await.unwrap();
        let all = store.get_all(Collection::Leads).await.unwrap();
        assert_eq!(all, vec![StoredRecord { id, body: json!({"n": 2}) }]);

        store.delete(Collection::Leads, id).await.unwrap();
        assert!(store.get_by_id(Collection::Leads, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store
            .update(Collection::Leads, 99, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { id: 99, .. }));
    }

    #[tokio::test]
    async fn collections_are_namespaced() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.add(Collection::Leads, &json!({"a": 1})).await.unwrap();
        store.add(Collection::LeadHistory, &json!({"b": 1})).await.unwrap();
        store.add(Collection::LeadHistory, &json!({"b": 2})).await.unwrap();
        assert_eq!(store.count(Collection::Leads).await.unwrap(), 1);
        assert_eq!(store.count(Collection::LeadHistory).await.unwrap(), 2);

        store.clear(Collection::LeadHistory).await.unwrap();
        assert_eq!(store.count(Collection::Leads).await.unwrap(), 1);
        assert_eq!(store.count(Collection::LeadHistory).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ids_auto_increment() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.add(Collection::Leads, &json!({})).await.unwrap();
        let b = store.add(Collection::Leads, &json!({})).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn typed_leads_roundtrip_with_ids() {
        let store = SqliteStore::in_memory().await.unwrap();
        let leads = LocalLeads::new(&store);
        let now = Utc::now();
        let id = leads
            .add_lead(&LocalLead {
                id: 0,
                name: "Grace".into(),
                email: Some("grace@example.com".into()),
                phone: None,
                company: Some("Navy".into()),
                stage: "qualified".into(),
                notes: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        leads
            .add_history(&LocalHistory {
                id: 0,
                lead_id: id,
                from_stage: Some("new".into()),
                to_stage: "qualified".into(),
                notes: None,
                created_at: now,
            })
            .await
            .unwrap();

        let mut lead = leads.lead(id).await.unwrap().unwrap();
        assert_eq!(lead.id, id);
        lead.stage = "won".into();
        leads.update_lead(&lead).await.unwrap();
        assert_eq!(leads.leads().await.unwrap()[0].stage, "won");
        assert_eq!(leads.history().await.unwrap()[0].lead_id, id);

        leads.clear().await.unwrap();
        assert_eq!(leads.lead_count().await.unwrap(), 0);
        assert!(leads.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("local.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.add(Collection::Leads, &json!({"k": "v"})).await.unwrap();
            store.close().await;
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.count(Collection::Leads).await.unwrap(), 1);
    }
}
