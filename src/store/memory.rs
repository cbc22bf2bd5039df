use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ApiKeyStore, StoreError, StoreResult};
use crate::models::ApiKeyRecord;

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<Uuid, ApiKeyRecord>,
    /// Digest -> id; the unique index
    by_hash: HashMap<String, Uuid>,
}

/// Process-local key store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryApiKeyStore {
    inner: RwLock<Inner>,
}

impl MemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn insert(&self, record: ApiKeyRecord) -> StoreResult<ApiKeyRecord> {
        let mut inner = self.inner.write().await;
        if inner.by_hash.contains_key(&record.hashed_secret) {
            return Err(StoreError::DuplicateHash);
        }
        if inner.by_id.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        inner
            .by_hash
            .insert(record.hashed_secret.clone(), record.id);
        inner.by_id.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, hashed_secret: &str) -> StoreResult<Option<ApiKeyRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_hash
            .get(hashed_secret)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<ApiKeyRecord>> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn list_for_owner(&self, owner_id: &str) -> StoreResult<Vec<ApiKeyRecord>> {
        let inner = self.inner.read().await;
        let mut keys: Vec<ApiKeyRecord> = inner
            .by_id
            .values()
            .filter(|record| record.owner_id == owner_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(record) = self.inner.write().await.by_id.get_mut(&id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<bool> {
        match self.inner.write().await.by_id.get_mut(&id) {
            Some(record) => {
                record.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.by_id.remove(&id) {
            Some(record) => {
                inner.by_hash.remove(&record.hashed_secret);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
