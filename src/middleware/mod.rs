//! HTTP middleware for rate limiting and authentication.
//!
//! - **Rate Limiting**: fixed-window counters per route category and client IP
//! - **API Key Authentication**: hashed key lookup with brute-force lockout
//! - **Admin Authentication**: shared operator secret for `/admin` routes
//! - **Client IP Resolution**: forwarded headers behind an explicit proxy allowlist
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Trace → Rate Limiter → Auth → Handler → Response
//!                                     ↓            ↓
//!                               429 Too Many   401 / 503
//! ```
//!
//! Request ids and tracing spans come from `tower-http` and are wired in
//! [`crate::routes`].

pub mod admin;
pub mod auth;
pub mod ip;
pub mod rate_limit;

pub use admin::{ADMIN_KEY_HEADER, AdminKey, require_admin_key};
pub use auth::ApiKeyAuth;
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, resolve_client_ip};
pub use rate_limit::{RateLimitCategory, RateLimitLayer};
