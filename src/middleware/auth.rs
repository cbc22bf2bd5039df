//! API key authentication middleware.
//!
//! # Flow
//!
//! ```text
//! request ─▶ reserve failure slot ──refused──▶ 429
//!               │admitted
//!               ▼
//!        extract credential ─▶ authenticate ──ok──▶ release slot ─▶ insert Principal ─▶ handler
//!                                  │
//!                                  ├─ credential failure ─▶ keep slot ─────▶ 401
//!                                  └─ store failure ──────▶ release slot ──▶ 503
//! ```
//!
//! Clients send the key as `Authorization: Bearer <key>` or `X-API-Key: <key>`:
//!
//! ```bash
//! curl -H "Authorization: Bearer kg_..." http://localhost:3000/api/me
//! ```
//!
//! # Uniform Failures
//!
//! Missing, unknown, disabled and expired keys all get the same 401 body so
//! the response does not reveal whether a key exists. The specific reason is
//! logged server-side.
//!
//! # Brute Force Protection
//!
//! Credential failures are counted per client IP with the shared
//! [`RateLimiter`] under the identity `authfail:{ip}`. Each attempt takes a
//! slot up front and hands it back if the key turns out valid or the store
//! is down, so only credential failures stay counted. Once the failure
//! policy is exhausted, requests from that IP get 429 before any key lookup
//! until the window resets.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::ip::{TrustedProxyConfig, resolve_client_ip};
use super::rate_limit::rate_limited_response;
use crate::credentials::extract_credential;
use crate::error::ErrorResponse;
use crate::metrics;
use crate::services::{ApiKeyService, RateLimitPolicy, RateLimiter};

/// API key authentication layer.
#[derive(Clone)]
pub struct ApiKeyAuth {
    api_keys: ApiKeyService,
    failure_limiter: RateLimiter,
    failure_policy: RateLimitPolicy,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl ApiKeyAuth {
    pub fn new(
        api_keys: ApiKeyService,
        failure_limiter: RateLimiter,
        failure_policy: RateLimitPolicy,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            api_keys,
            failure_limiter,
            failure_policy,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for ApiKeyAuth {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            auth: self.clone(),
        }
    }
}

/// API key authentication service wrapper.
#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    auth: ApiKeyAuth,
}

impl<S> Service<Request<Body>> for ApiKeyAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let auth = self.auth.clone();
        let mut inner = self.inner.clone();

        let client_ip = resolve_client_ip(&req, &auth.trusted_proxies);
        let failure_key = format!("authfail:{client_ip}");

        // Every attempt reserves a failure slot before the store is touched, so
        // concurrent guesses cannot all slip past the lockout.
        let reservation = auth
            .failure_limiter
            .check(&failure_key, &auth.failure_policy);
        if !reservation.admitted {
            let retry_after = reservation.retry_after_secs(auth.failure_limiter.now());
            warn!(
                client_ip = %client_ip,
                retry_after_secs = retry_after,
                "IP blocked due to excessive auth failures"
            );
            return Box::pin(async move {
                Ok(rate_limited_response(
                    "too_many_requests",
                    "Too many failed authentication attempts. Please wait before retrying.",
                    retry_after,
                ))
            });
        }

        Box::pin(async move {
            let started = Instant::now();
            let result = match extract_credential(req.headers()) {
                Ok(raw) => auth.api_keys.authenticate(raw).await,
                Err(e) => Err(e),
            };
            let elapsed = started.elapsed().as_secs_f64();

            match result {
                Ok(principal) => {
                    auth.failure_limiter.release(&failure_key, &reservation);
                    metrics::record_auth_attempt("success", elapsed);
                    debug!(
                        key_id = %principal.key_id,
                        owner_id = %principal.owner_id,
                        "API key authentication successful"
                    );
                    req.extensions_mut().insert(principal);
                    inner.call(req).await
                }
                Err(e) if e.is_credential_failure() => {
                    // The reserved slot stays counted
                    metrics::record_auth_attempt(e.kind(), elapsed);
                    warn!(
                        path = %req.uri().path(),
                        client_ip = %client_ip,
                        reason = e.kind(),
                        "API key authentication failed"
                    );
                    Ok(unauthorized_response())
                }
                Err(e) => {
                    auth.failure_limiter.release(&failure_key, &reservation);
                    metrics::record_auth_attempt(e.kind(), elapsed);
                    error!(error = %e, path = %req.uri().path(), "Key store unavailable during authentication");
                    Ok(store_unavailable_response())
                }
            }
        })
    }
}

/// Same body for every credential failure.
fn unauthorized_response() -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
        Json(ErrorResponse::new(
            "unauthorized",
            "A valid API key is required.",
        )),
    )
        .into_response()
}

fn store_unavailable_response() -> Response<Body> {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new(
            "store_unavailable",
            "Key storage is temporarily unavailable. Please try again later.",
        )),
    )
        .into_response()
}
