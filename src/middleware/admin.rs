//! Operator authentication for `/admin` routes.
//!
//! Admin routes issue keys on behalf of any owner, so they are guarded by a
//! single shared secret (`ADMIN_API_KEY`) sent as `X-Admin-Key`. The routes
//! are not mounted at all when no secret is configured.
//!
//! ```rust,ignore
//! let admin = Router::new()
//!     .route("/admin/keys/{id}", delete(revoke_key))
//!     .layer(from_fn_with_state(AdminKey::new(secret), require_admin_key));
//! ```

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ErrorResponse;

/// Header carrying the operator secret.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Expected operator secret.
#[derive(Clone)]
pub struct AdminKey(Arc<String>);

impl AdminKey {
    pub fn new(secret: String) -> Self {
        Self(Arc::new(secret))
    }

    fn matches(&self, provided: &str) -> bool {
        self.0.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminKey(..)")
    }
}

/// Reject requests whose `X-Admin-Key` does not match.
pub async fn require_admin_key(
    State(expected): State<AdminKey>,
    req: Request,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided.is_empty() || !expected.matches(provided) {
        warn!(path = %req.uri().path(), "Rejected admin request with invalid key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "unauthorized",
                "A valid admin key is required.",
            )),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(from_fn_with_state(
                AdminKey::new("operator-secret".to_string()),
                require_admin_key,
            ))
    }

    async fn status(header: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri("/admin");
        if let Some(value) = header {
            builder = builder.header(ADMIN_KEY_HEADER, value);
        }
        app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_admin_key_required() {
        assert_eq!(status(Some("operator-secret")).await, StatusCode::OK);
        assert_eq!(status(Some("wrong")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(Some("")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(None).await, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = AdminKey::new("operator-secret".to_string());
        assert!(!format!("{key:?}").contains("operator-secret"));
    }
}
