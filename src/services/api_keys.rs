use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::credentials::{digest_secret, digests_match, generate_secret, key_start};
use crate::error::{AppError, AppResult, AuthError};
use crate::models::{ApiKeyRecord, IssuedApiKey, NewApiKey, Principal};
use crate::store::{ApiKeyStore, StoreError};

/// How many fresh secrets to try when a digest collides with an existing key.
const MAX_ISSUE_ATTEMPTS: usize = 3;

/// Issues, verifies and manages API keys.
///
/// Holds no state of its own beyond its collaborators, so it is cheap to
/// clone into handlers and middleware.
#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn ApiKeyStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

impl std::fmt::Debug for ApiKeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyService")
            .field("backend", &self.store.backend())
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn ApiKeyStore>, clock: Arc<dyn Clock>, key_prefix: String) -> Self {
        Self {
            store,
            clock,
            key_prefix,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Probe the backing store.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    /// Generate a secret, persist its digest and hand back the raw secret.
    ///
    /// The returned [`IssuedApiKey::secret`] is the only copy of the raw
    /// secret; it cannot be recovered later.
    #[instrument(skip(self, new_key), fields(owner_id = %new_key.owner_id))]
    pub async fn issue(&self, new_key: NewApiKey) -> AppResult<IssuedApiKey> {
        let NewApiKey {
            name,
            owner_id,
            permissions,
            expires_at,
        } = new_key;

        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let secret = generate_secret(&self.key_prefix);
            let record = ApiKeyRecord {
                id: Uuid::new_v4(),
                name: name.clone(),
                hashed_secret: digest_secret(&secret),
                key_start: key_start(&secret),
                owner_id: owner_id.clone(),
                is_active: true,
                expires_at,
                permissions: permissions.clone(),
                last_used_at: None,
                created_at: self.clock.now(),
            };

            match self.store.insert(record).await {
                Ok(record) => {
                    crate::metrics::record_key_issued();
                    info!(key_id = %record.id, key_start = %record.key_start, "API key issued");
                    return Ok(IssuedApiKey { record, secret });
                }
                Err(e @ (StoreError::DuplicateHash | StoreError::DuplicateId(_))) => {
                    warn!(attempt, error = %e, "Generated API key collided with an existing key");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "could not generate a unique API key after {MAX_ISSUE_ATTEMPTS} attempts"
        )))
    }

    /// Resolve a raw credential to a [`Principal`].
    ///
    /// Checks run in a fixed order: unknown digest, inactive, expired. On
    /// success `last_used_at` is refreshed; a failed refresh is logged and
    /// does not fail the request.
    pub async fn authenticate(&self, raw: &str) -> Result<Principal, AuthError> {
        let candidate = digest_secret(raw);

        let record = self
            .store
            .find_by_hash(&candidate)
            .await?
            .filter(|record| digests_match(&record.hashed_secret, &candidate))
            .ok_or(AuthError::InvalidCredential)?;

        if !record.is_active {
            return Err(AuthError::Disabled);
        }

        let now = self.clock.now();
        if record.is_expired_at(now) {
            return Err(AuthError::Expired);
        }

        if let Err(e) = self.store.touch_last_used(record.id, now).await {
            warn!(key_id = %record.id, error = %e, "Failed to update API key last_used_at");
        }

        debug!(key_id = %record.id, owner_id = %record.owner_id, "API key authenticated");
        Ok(Principal::from(&record))
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> AppResult<Vec<ApiKeyRecord>> {
        Ok(self.store.list_for_owner(owner_id).await?)
    }

    /// Disable a key owned by `owner_id`. The record is kept.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, owner_id: &str, id: Uuid) -> AppResult<()> {
        self.owned(owner_id, id).await?;
        if !self.store.deactivate(id).await? {
            return Err(not_found(id));
        }
        info!(key_id = %id, "API key deactivated");
        Ok(())
    }

    /// Delete a key owned by `owner_id`.
    #[instrument(skip(self))]
    pub async fn revoke(&self, owner_id: &str, id: Uuid) -> AppResult<()> {
        self.owned(owner_id, id).await?;
        self.revoke_any(id).await
    }

    /// Delete a key regardless of owner. Admin only.
    #[instrument(skip(self))]
    pub async fn revoke_any(&self, id: Uuid) -> AppResult<()> {
        if !self.store.delete(id).await? {
            return Err(not_found(id));
        }
        info!(key_id = %id, "API key revoked");
        Ok(())
    }

    /// Another owner's key is reported as missing, not forbidden.
    async fn owned(&self, owner_id: &str, id: Uuid) -> AppResult<ApiKeyRecord> {
        self.store
            .find_by_id(id)
            .await?
            .filter(|record| record.owner_id == owner_id)
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("API key {id} not found"))
}
