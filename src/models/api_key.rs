use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Permission that allows a principal to issue, deactivate and revoke its own keys.
pub const PERMISSION_KEYS_MANAGE: &str = "keys:manage";

/// Permission granted to keys issued without an explicit scope list.
pub const PERMISSION_READ: &str = "read";

/// Persisted API key.
///
/// The raw secret is never part of this record; only its digest is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    /// Owner-chosen label
    pub name: String,
    /// Hex SHA-256 digest of the raw secret (unique across records)
    pub hashed_secret: String,
    /// First few characters of the raw secret, for display in listings
    pub key_start: String,
    /// Identity-provider user id of the owner
    pub owner_id: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: BTreeSet<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKeyRecord {
    /// Whether the key's expiry lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Parameters for issuing a key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub name: String,
    pub owner_id: String,
    pub permissions: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of issuance: the stored record plus the raw secret.
///
/// This is the only place the raw secret ever exists after generation.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub record: ApiKeyRecord,
    pub secret: String,
}

/// Authenticated identity resolved from an API key.
///
/// Inserted into request extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub owner_id: String,
    pub key_id: Uuid,
    pub permissions: BTreeSet<String>,
}

impl Principal {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

impl From<&ApiKeyRecord> for Principal {
    fn from(record: &ApiKeyRecord) -> Self {
        Self {
            owner_id: record.owner_id.clone(),
            key_id: record.id,
            permissions: record.permissions.clone(),
        }
    }
}

/// Request to issue a new API key.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateApiKeyRequest {
    /// Human-readable label
    pub name: String,
    /// Scopes to grant (defaults to `["read"]`)
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    /// Absolute expiry (RFC 3339)
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative expiry; ignored when `expires_at` is set
    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

/// Public view of a key. Never includes the digest.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub name: String,
    pub key_start: String,
    pub owner_id: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: BTreeSet<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&ApiKeyRecord> for ApiKeySummary {
    fn from(record: &ApiKeyRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            key_start: record.key_start.clone(),
            owner_id: record.owner_id.clone(),
            is_active: record.is_active,
            expires_at: record.expires_at,
            permissions: record.permissions.clone(),
            last_used_at: record.last_used_at,
            created_at: record.created_at,
        }
    }
}

/// Response to a successful issuance.
#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    #[serde(flatten)]
    pub api_key: ApiKeySummary,
    /// Plaintext key (only returned on creation)
    pub key: String,
}

impl From<IssuedApiKey> for CreateApiKeyResponse {
    fn from(issued: IssuedApiKey) -> Self {
        Self {
            api_key: ApiKeySummary::from(&issued.record),
            key: issued.secret,
        }
    }
}
