//! SeaORM-backed document store.
//!
//! One row per key in `state_documents`; saves are conflict-upserts keyed
//! on the primary key. The schema lives in the workspace `migration`
//! package.

use async_trait::async_trait;
use bytes::Bytes;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use time::OffsetDateTime;

use crate::entities::state_documents;
use crate::error::SyncError;
use crate::persistence::StateStore;

pub struct SeaDocumentStore {
    db: DatabaseConnection,
}

impl SeaDocumentStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn active_model(key: &str, payload: &[u8]) -> state_documents::ActiveModel {
        let now = OffsetDateTime::now_utc();
        state_documents::ActiveModel {
            key: Set(key.to_string()),
            payload: Set(payload.to_vec()),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }

    fn upsert_on_key() -> OnConflict {
        OnConflict::column(state_documents::Column::Key)
            .update_columns([
                state_documents::Column::Payload,
                state_documents::Column::UpdatedAt,
            ])
            .to_owned()
    }
}

#[async_trait]
impl StateStore for SeaDocumentStore {
    async fn save(&self, key: &str, payload: &[u8]) -> Result<String, SyncError> {
        state_documents::Entity::insert(Self::active_model(key, payload))
            .on_conflict(Self::upsert_on_key())
            .exec_without_returning(&self.db)
            .await?;
        Ok(key.to_string())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let found = state_documents::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?;
        Ok(found.map(|model| model.payload))
    }

    async fn delete(&self, key: &str) -> Result<bool, SyncError> {
        let result = state_documents::Entity::delete_by_id(key.to_string())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn batch_save(&self, items: &[(String, Bytes)]) -> Result<Vec<String>, SyncError> {
        if items.is_empty() {
            return Ok(vec![]);
        }
        let models = items
            .iter()
            .map(|(key, payload)| Self::active_model(key, payload));
        state_documents::Entity::insert_many(models)
            .on_conflict(Self::upsert_on_key())
            .exec_without_returning(&self.db)
            .await?;
        Ok(items.iter().map(|(key, _)| key.clone()).collect())
    }
}
