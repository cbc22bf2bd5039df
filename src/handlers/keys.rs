//! Self-service API key management for authenticated principals.
//!
//! Every route here sits behind [`ApiKeyAuth`](crate::middleware::ApiKeyAuth),
//! so a [`Principal`] is always present in request extensions. Keys are
//! always scoped to the caller's `owner_id`.

use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ApiKeySummary, CreateApiKeyRequest, CreateApiKeyResponse, NewApiKey, PERMISSION_KEYS_MANAGE,
    PERMISSION_READ, Principal,
};
use crate::state::AppState;
use crate::validation::{resolve_expiry, validate_key_name, validate_permissions};

/// Validate a create request and turn it into issuance parameters.
pub(super) fn new_key_from_request(
    owner_id: String,
    request: CreateApiKeyRequest,
    now: chrono::DateTime<chrono::Utc>,
) -> AppResult<NewApiKey> {
    let name = request.name.trim().to_string();
    validate_key_name(&name)?;

    let permissions: BTreeSet<String> = match request.permissions {
        Some(scopes) => scopes.into_iter().map(|s| s.trim().to_string()).collect(),
        None => BTreeSet::from([PERMISSION_READ.to_string()]),
    };
    validate_permissions(permissions.iter().map(String::as_str))?;

    Ok(NewApiKey {
        name,
        owner_id,
        permissions,
        expires_at: resolve_expiry(request.expires_at, request.expires_in_days, now)?,
    })
}

fn require_permission(principal: &Principal, permission: &str) -> AppResult<()> {
    if principal.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "API key lacks the '{permission}' permission"
        )))
    }
}

/// Identity behind the presented key.
pub async fn me(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}

/// List the caller's keys, newest first.
#[instrument(skip(state, principal), fields(owner_id = %principal.owner_id))]
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<Vec<ApiKeySummary>>> {
    let keys = state.api_keys.list_for_owner(&principal.owner_id).await?;
    Ok(Json(keys.iter().map(ApiKeySummary::from).collect()))
}

/// Issue a new key for the caller.
///
/// A key cannot grant permissions its creator does not hold.
#[instrument(skip(state, principal, request), fields(owner_id = %principal.owner_id))]
pub async fn create_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateApiKeyRequest>,
) -> AppResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    require_permission(&principal, PERMISSION_KEYS_MANAGE)?;

    let new_key = new_key_from_request(principal.owner_id.clone(), request, state.api_keys.now())?;
    if let Some(extra) = new_key
        .permissions
        .iter()
        .find(|scope| !principal.has_permission(scope))
    {
        return Err(AppError::Forbidden(format!(
            "Cannot grant '{extra}': the calling key does not hold it"
        )));
    }

    let issued = state.api_keys.issue(new_key).await?;
    info!(key_id = %issued.record.id, created_by = %principal.key_id, "Key created via API");
    Ok((StatusCode::CREATED, Json(issued.into())))
}

/// Delete one of the caller's keys.
#[instrument(skip(state, principal), fields(owner_id = %principal.owner_id))]
pub async fn revoke_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_permission(&principal, PERMISSION_KEYS_MANAGE)?;
    state.api_keys.revoke(&principal.owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Disable one of the caller's keys without deleting it.
#[instrument(skip(state, principal), fields(owner_id = %principal.owner_id))]
pub async fn deactivate_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_permission(&principal, PERMISSION_KEYS_MANAGE)?;
    state.api_keys.deactivate(&principal.owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
