use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;
use uuid::Uuid;

use super::{ApiKeyStore, StoreError, StoreResult};
use crate::models::ApiKeyRecord;

const SELECT_COLUMNS: &str = "SELECT id, name, hashed_secret, key_start, owner_id, is_active, \
     expires_at, permissions, last_used_at, created_at FROM api_keys";

#[derive(Debug, sqlx::FromRow)]
struct ApiKeyRow {
    id: String,
    name: String,
    hashed_secret: String,
    key_start: String,
    owner_id: String,
    is_active: bool,
    expires_at: Option<String>,
    permissions: String,
    last_used_at: Option<String>,
    created_at: String,
}

impl TryFrom<ApiKeyRow> for ApiKeyRecord {
    type Error = StoreError;

    fn try_from(row: ApiKeyRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("invalid id {}: {e}", row.id)))?;
        let permissions: BTreeSet<String> = serde_json::from_str(&row.permissions)
            .map_err(|e| StoreError::Corrupt(format!("invalid permissions for {id}: {e}")))?;

        Ok(ApiKeyRecord {
            id,
            name: row.name,
            hashed_secret: row.hashed_secret,
            key_start: row.key_start,
            owner_id: row.owner_id,
            is_active: row.is_active,
            expires_at: row.expires_at.as_deref().map(parse_timestamp).transpose()?,
            permissions,
            last_used_at: row.last_used_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// SQLite-backed key store.
///
/// Migrations from `migrations/` run on construction.
#[derive(Debug, Clone)]
pub struct SqliteApiKeyStore {
    pool: SqlitePool,
}

impl SqliteApiKeyStore {
    /// Open (creating if missing) the database at `database_url` and migrate it.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations first.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("API key database migrations applied");
        Ok(Self { pool })
    }

    async fn fetch_one_by(&self, column: &str, value: String) -> StoreResult<Option<ApiKeyRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE {column} = ?");
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(ApiKeyRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl ApiKeyStore for SqliteApiKeyStore {
    async fn insert(&self, record: ApiKeyRecord) -> StoreResult<ApiKeyRecord> {
        let permissions = serde_json::to_string(&record.permissions)
            .map_err(|e| StoreError::Corrupt(format!("unserializable permissions: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO api_keys (id, name, hashed_secret, key_start, owner_id, is_active,
                                  expires_at, permissions, last_used_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&record.hashed_secret)
        .bind(&record.key_start)
        .bind(&record.owner_id)
        .bind(record.is_active)
        .bind(record.expires_at.map(format_timestamp))
        .bind(permissions)
        .bind(record.last_used_at.map(format_timestamp))
        .bind(format_timestamp(record.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(record),
            // SQLite names the violated columns: "UNIQUE constraint failed: api_keys.id"
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                if e.message().contains("api_keys.hashed_secret") {
                    Err(StoreError::DuplicateHash)
                } else if e.message().contains("api_keys.id") {
                    Err(StoreError::DuplicateId(record.id))
                } else {
                    Err(sqlx::Error::Database(e).into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_hash(&self, hashed_secret: &str) -> StoreResult<Option<ApiKeyRecord>> {
        self.fetch_one_by("hashed_secret", hashed_secret.to_string())
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<ApiKeyRecord>> {
        self.fetch_one_by("id", id.to_string()).await
    }

    async fn list_for_owner(&self, owner_id: &str) -> StoreResult<Vec<ApiKeyRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE owner_id = ? ORDER BY created_at DESC");
        sqlx::query_as::<_, ApiKeyRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ApiKeyRecord::try_from)
            .collect()
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(format_timestamp(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE api_keys SET is_active = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {raw}: {e}")))
}
