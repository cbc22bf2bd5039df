//! Health, readiness, and statistics endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with key store status
//! - `GET /ready` - Kubernetes-compatible readiness probe
//! - `GET /api/stats` - Service statistics (authenticated)
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 even if degraded, includes details
//! - **Readiness** (`/ready`): Returns 503 while the key store is unreachable

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::models::{HealthResponse, StatsResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK with status details in the body.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "key_store_available": true,
///   "key_store": "sqlite",
///   "version": "0.1.0",
///   "timestamp": "2026-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let key_store_available = match state.api_keys.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Key store ping failed");
            false
        }
    };

    Json(HealthResponse {
        status: if key_store_available {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        key_store_available,
        key_store: state.api_keys.backend().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
///
/// ```yaml
/// readinessProbe:
///   httpGet:
///     path: /ready
///     port: 3000
/// ```
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    state
        .api_keys
        .ping()
        .await
        .map(|()| StatusCode::OK)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

/// Service statistics.
#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.uptime_seconds(),
        rate_limit_tracked_clients: state.rate_limiter.tracked_clients(),
        key_store: state.api_keys.backend().to_string(),
    })
}
