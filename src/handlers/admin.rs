//! Operator endpoints for bootstrapping and revoking keys on behalf of owners.
//!
//! Guarded by [`require_admin_key`](crate::middleware::require_admin_key).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::{info, instrument};
use uuid::Uuid;

use super::keys::new_key_from_request;
use crate::error::AppResult;
use crate::models::{ApiKeySummary, CreateApiKeyRequest, CreateApiKeyResponse};
use crate::state::AppState;
use crate::validation::validate_owner_id;

/// Issue a key for `owner_id`.
#[instrument(skip(state, request))]
pub async fn issue_owner_key(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Json(request): Json<CreateApiKeyRequest>,
) -> AppResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    validate_owner_id(&owner_id)?;

    let new_key = new_key_from_request(owner_id, request, state.api_keys.now())?;
    let issued = state.api_keys.issue(new_key).await?;
    info!(key_id = %issued.record.id, "Key issued by operator");
    Ok((StatusCode::CREATED, Json(issued.into())))
}

/// List every key belonging to `owner_id`.
#[instrument(skip(state))]
pub async fn list_owner_keys(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> AppResult<Json<Vec<ApiKeySummary>>> {
    validate_owner_id(&owner_id)?;

    let keys = state.api_keys.list_for_owner(&owner_id).await?;
    Ok(Json(keys.iter().map(ApiKeySummary::from).collect()))
}

/// Delete any key by id.
#[instrument(skip(state))]
pub async fn revoke_any_key(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.api_keys.revoke_any(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
