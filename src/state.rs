//! Shared application state for Axum handlers.
//!
//! - **Services**: API key issuance/verification and the rate limiter
//! - **Configuration**: runtime configuration access
//! - **Background tasks**: the rate limit sweeper
//!
//! # Structured Concurrency
//!
//! The sweeper is spawned when the state is built and owned by it. Call
//! [`AppState::shutdown`] after the HTTP server stops to cancel it and wait
//! for it to exit.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::clock::Clock;
use crate::config::Config;
use crate::middleware::TrustedProxyConfig;
use crate::services::{
    ApiKeyService, MemoryRateLimitStore, RateLimitSweeper, RateLimiter,
};
use crate::store::ApiKeyStore;

/// Shared application state.
///
/// Cloned for each request handler; everything inside is behind an `Arc`.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, store, Arc::new(SystemClock));
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub api_keys: ApiKeyService,
    pub rate_limiter: RateLimiter,
    /// Parsed `TRUSTED_PROXIES`
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    pub config: Arc<Config>,
    sweeper: RateLimitSweeper,
}

impl AppState {
    /// Build state and start the rate limit sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, store: Arc<dyn ApiKeyStore>, clock: Arc<dyn Clock>) -> Self {
        let api_keys = ApiKeyService::new(store, clock.clone(), config.api_key_prefix.clone());
        let rate_limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::new()), clock);
        let sweeper =
            RateLimitSweeper::start(rate_limiter.clone(), config.rate_limit_sweep_interval);
        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));

        Self {
            api_keys,
            rate_limiter,
            trusted_proxies,
            started_at: Instant::now(),
            config: Arc::new(config),
            sweeper,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Stopping background tasks");
        self.sweeper.stop().await;
        info!("All background tasks stopped");
    }
}
