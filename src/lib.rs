//! # keygate
//!
//! Per-client rate limiting and hashed API key authentication for the
//! backend of a dashboard and marketing site, built on Axum:
//!
//! - **Rate limiting**: fixed-window counters per route category and client IP
//! - **API keys**: generated secrets stored only as SHA-256 digests
//! - **Principals**: authenticated requests carry owner id and permissions
//! - **Testability**: key store and clock are injected behind traits
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → Rate Limit → Auth)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, keys, admin, contact, analytics)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Services (ApiKeyService, RateLimiter + sweeper)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ApiKeyStore (memory / SQLite)        Clock (system / manual)│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keygate::{AppState, Config, SystemClock, build_router};
//! use keygate::store::MemoryApiKeyStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config, Arc::new(MemoryApiKeyStore::new()), Arc::new(SystemClock));
//!     let app = build_router(state.clone())?;
//!
//!     // Serve `app` with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Persist keys and enable the operator routes:
//! ```bash
//! DATABASE_URL=sqlite://keygate.db ADMIN_API_KEY=change-me-to-something-long cargo run
//! ```
//!
//! Only believe `X-Forwarded-For` from your load balancer:
//! ```bash
//! TRUSTED_PROXIES=10.0.0.0/8 cargo run
//! ```

pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{AppError, AppResult, AuthError};
pub use routes::build_router;
pub use services::{ApiKeyService, RateLimiter};
pub use state::AppState;
