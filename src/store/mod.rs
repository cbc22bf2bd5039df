//! Persistence for API key records.
//!
//! The authenticator only talks to the [`ApiKeyStore`] trait, so the backing
//! database can be swapped without touching middleware or handlers.
//!
//! | Backend | When |
//! |---|---|
//! | [`MemoryApiKeyStore`] | `DATABASE_URL` unset (development, tests) |
//! | [`SqliteApiKeyStore`] | `DATABASE_URL=sqlite://...` |
//!
//! Both backends enforce uniqueness of `id` and of `hashed_secret`, and
//! report the two collisions as distinct [`StoreError`] variants.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ApiKeyRecord;

pub use memory::MemoryApiKeyStore;
pub use sqlite::SqliteApiKeyStore;

/// Errors raised by key store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("an API key with the same digest already exists")]
    DuplicateHash,

    #[error("an API key with id {0} already exists")]
    DuplicateId(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Data-access seam for API key records.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Persist a new record. Fails with [`StoreError::DuplicateHash`] if the
    /// digest is already taken.
    async fn insert(&self, record: ApiKeyRecord) -> StoreResult<ApiKeyRecord>;

    /// Exact-match lookup by digest.
    async fn find_by_hash(&self, hashed_secret: &str) -> StoreResult<Option<ApiKeyRecord>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<ApiKeyRecord>>;

    /// All keys belonging to `owner_id`, newest first.
    async fn list_for_owner(&self, owner_id: &str) -> StoreResult<Vec<ApiKeyRecord>>;

    /// Set `last_used_at`. Unknown ids are ignored.
    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Set `is_active = false`. Returns whether a record was found.
    async fn deactivate(&self, id: Uuid) -> StoreResult<bool>;

    /// Remove a record. Returns whether a record was found.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> StoreResult<()>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
