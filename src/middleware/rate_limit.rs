//! Per-client fixed-window rate limiting middleware.
//!
//! Every route group is wrapped in its own [`RateLimitLayer`] with a
//! [`RateLimitCategory`] and a [`RateLimitPolicy`]. The counter key is
//! `"{category}:{client_ip}"`, so a client's contact-form quota is separate
//! from its API quota.
//!
//! # Response Headers
//!
//! Admitted and rejected responses both carry:
//! - `X-RateLimit-Limit`: requests allowed per window
//! - `X-RateLimit-Remaining`: requests left in the current window
//! - `X-RateLimit-Reset`: unix seconds at which the window ends
//!
//! Rejected responses are `429` with a JSON body and `Retry-After` (seconds,
//! at least 1).
//!
//! Client addresses are resolved by [`resolve_client_ip`]; see that module
//! for the trusted-proxy rules.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, resolve_client_ip};
use crate::error::ErrorResponse;
use crate::metrics;
use crate::services::{RateLimitDecision, RateLimitPolicy, RateLimiter};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Route group a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    /// Authenticated dashboard API
    Api,
    /// Public contact form
    Contact,
    /// Public analytics ingestion
    Analytics,
    /// Operator endpoints
    Admin,
}

impl RateLimitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitCategory::Api => "api",
            RateLimitCategory::Contact => "contact",
            RateLimitCategory::Analytics => "analytics",
            RateLimitCategory::Admin => "admin",
        }
    }
}

impl fmt::Display for RateLimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tower layer applying one category's policy.
///
/// # Example
///
/// ```rust,ignore
/// let policy = RateLimitPolicy::per_millis(5, 900_000)?;
/// let contact = Router::new()
///     .route("/contact", post(submit_contact))
///     .layer(RateLimitLayer::new(limiter, RateLimitCategory::Contact, policy, proxies));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
    category: RateLimitCategory,
    policy: RateLimitPolicy,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(
        limiter: RateLimiter,
        category: RateLimitCategory,
        policy: RateLimitPolicy,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            limiter,
            category,
            policy,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let RateLimitLayer {
            limiter,
            category,
            policy,
            trusted_proxies,
        } = &self.layer;

        let client_ip = resolve_client_ip(&req, trusted_proxies);
        let identity = format!("{category}:{client_ip}");
        let decision = limiter.check(&identity, policy);
        metrics::record_rate_limit_decision(category.as_str(), decision.admitted);

        if !decision.admitted {
            let retry_after = decision.retry_after_secs(limiter.now());
            warn!(
                client_ip = %client_ip,
                category = %category,
                path = %req.uri().path(),
                retry_after_secs = retry_after,
                "Rate limit exceeded"
            );

            let mut response = rate_limited_response(
                "rate_limited",
                "Too many requests. Please retry later.",
                retry_after,
            );
            apply_rate_limit_headers(response.headers_mut(), &decision);
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut response = inner.call(req).await?;
            apply_rate_limit_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

/// Set `X-RateLimit-*` headers from a decision.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp()),
    );
}

/// Build a 429 JSON response with `Retry-After`.
pub(crate) fn rate_limited_response(error: &str, message: &str, retry_after: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, HeaderValue::from(retry_after))],
        Json(ErrorResponse::new(error, message)),
    )
        .into_response()
}
