//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets/propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← Span per request carrying the request id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  CORS, body size │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if the category budget is spent (per group)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401/503 (API group), X-Admin-Key (admin group)
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! | Group | Routes | Rate limit | Auth |
//! |---|---|---|---|
//! | health | `/health`, `/ready` | none | none |
//! | contact | `POST /contact` | `contact` | none |
//! | analytics | `POST /analytics/events` | `analytics` | none |
//! | api | `/api/me`, `/api/stats`, `/api/keys...` | `api` | API key |
//! | admin | `/admin/...` (only with `ADMIN_API_KEY`) | `admin` | `X-Admin-Key` |

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::RateLimitSettings;
use crate::handlers;
use crate::middleware::{
    AdminKey, ApiKeyAuth, RateLimitCategory, RateLimitLayer, TrustedProxyConfig,
    require_admin_key,
};
use crate::services::{RateLimitError, RateLimiter};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Errors
///
/// Returns `RateLimitError` if a configured policy has a zero limit or window.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = state.config.clone();
    let groups = GroupLimits {
        enabled: config.rate_limit_enabled,
        limiter: state.rate_limiter.clone(),
        trusted_proxies: state.trusted_proxies.clone(),
    };

    // =========================================================================
    // Route Groups
    // =========================================================================
    let health = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check));

    let contact = groups.apply(
        Router::new().route("/contact", post(handlers::submit_contact)),
        RateLimitCategory::Contact,
        &config.rate_limit_contact,
    )?;

    let analytics = groups.apply(
        Router::new().route("/analytics/events", post(handlers::record_event)),
        RateLimitCategory::Analytics,
        &config.rate_limit_analytics,
    )?;

    let auth = ApiKeyAuth::new(
        state.api_keys.clone(),
        state.rate_limiter.clone(),
        config.auth_failure.policy()?,
        state.trusted_proxies.clone(),
    );
    let api = groups.apply(
        Router::new()
            .route("/api/me", get(handlers::me))
            .route("/api/stats", get(handlers::stats))
            .route(
                "/api/keys",
                get(handlers::list_keys).post(handlers::create_key),
            )
            .route("/api/keys/{id}", delete(handlers::revoke_key))
            .route("/api/keys/{id}/deactivate", post(handlers::deactivate_key))
            .layer(auth),
        RateLimitCategory::Api,
        &config.rate_limit_api,
    )?;

    let mut router = Router::new()
        .merge(health)
        .merge(contact)
        .merge(analytics)
        .merge(api);

    if let Some(secret) = &config.admin_api_key {
        let admin = groups.apply(
            Router::new()
                .route(
                    "/admin/owners/{owner_id}/keys",
                    get(handlers::list_owner_keys).post(handlers::issue_owner_key),
                )
                .route("/admin/keys/{id}", delete(handlers::revoke_any_key))
                .layer(from_fn_with_state(
                    AdminKey::new(secret.clone()),
                    require_admin_key,
                )),
            RateLimitCategory::Admin,
            &config.rate_limit_admin,
        )?;
        router = router.merge(admin);
        info!("Admin routes enabled");
    } else {
        info!("Admin routes disabled (no ADMIN_API_KEY set)");
    }

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 3. Echo the request id on the response
    router = router.layer(PropagateRequestIdLayer::x_request_id());

    // 4. Tracing, with the request id on the span
    router = router.layer(TraceLayer::new_for_http().make_span_with(
        |request: &Request<Body>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        },
    ));

    // 5. Request ID - outermost so every layer below sees it
    router = router.layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    Ok(router.with_state(state))
}

/// Shared inputs for per-group rate limit layers.
struct GroupLimits {
    enabled: bool,
    limiter: RateLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl GroupLimits {
    fn apply(
        &self,
        router: Router<AppState>,
        category: RateLimitCategory,
        settings: &RateLimitSettings,
    ) -> Result<Router<AppState>, RateLimitError> {
        if !self.enabled {
            return Ok(router);
        }

        info!(
            category = %category,
            max_requests = settings.max_requests,
            window_ms = settings.window.as_millis() as u64,
            "Rate limiting enabled"
        );
        Ok(router.layer(RateLimitLayer::new(
            self.limiter.clone(),
            category,
            settings.policy()?,
            self.trusted_proxies.clone(),
        )))
    }
}

/// Build CORS layer from configuration.
///
/// `*` (any origin) is convenient for development but should be avoided in
/// production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
