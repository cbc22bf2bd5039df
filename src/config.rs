//! Application configuration loaded from environment variables.
//!
//! All settings have development defaults. In production, configure via
//! environment variables or a `.env` file.
//!
//! # Rate Limits
//!
//! Each route category has a request budget per fixed window:
//!
//! | Category | `*_MAX` default | `*_WINDOW_MS` default |
//! |---|---|---|
//! | `RATE_LIMIT_API` | 100 | 60 000 |
//! | `RATE_LIMIT_CONTACT` | 5 | 900 000 |
//! | `RATE_LIMIT_ANALYTICS` | 300 | 60 000 |
//! | `RATE_LIMIT_ADMIN` | 30 | 60 000 |
//!
//! `RATE_LIMIT_ENABLED=false` removes the per-category layers. The auth
//! failure lockout (`AUTH_FAILURE_LIMIT` per `AUTH_FAILURE_WINDOW_MS`) stays on.
//!
//! # Security
//!
//! - `TRUSTED_PROXIES`: CIDR allowlist of reverse proxies (empty trusts all forwarded headers)
//! - `ADMIN_API_KEY`: enables `/admin` routes when set
//! - `API_KEY_PREFIX`: prefix of generated keys (default `kg_`)
//! - `CORS_ALLOWED_ORIGINS`: comma-separated origins (default: `*` for dev)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::credentials::DEFAULT_KEY_PREFIX;
use crate::error::{AppError, AppResult};
use crate::services::{RateLimitError, RateLimitPolicy};

/// Shortest accepted `ADMIN_API_KEY`.
const MIN_ADMIN_KEY_LEN: usize = 16;

/// Longest accepted `API_KEY_PREFIX`.
const MAX_KEY_PREFIX_LEN: usize = 16;

/// Request budget for one route category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitSettings {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_millis(window_ms),
        }
    }

    pub fn policy(&self) -> Result<RateLimitPolicy, RateLimitError> {
        RateLimitPolicy::new(self.max_requests, self.window)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Application configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 64KB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Key Store Configuration
    // =========================================================================
    /// SQLite URL for the key store, e.g. `sqlite://keygate.db`.
    /// Unset means an in-memory store that is lost on restart.
    pub database_url: Option<String>,

    /// Prefix prepended to generated API keys (default: "kg_")
    pub api_key_prefix: String,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    pub rate_limit_enabled: bool,
    pub rate_limit_api: RateLimitSettings,
    pub rate_limit_contact: RateLimitSettings,
    pub rate_limit_analytics: RateLimitSettings,
    pub rate_limit_admin: RateLimitSettings,

    /// How often expired rate limit entries are swept (default: 60s)
    pub rate_limit_sweep_interval: Duration,

    /// Failed authentications allowed per client IP per window before lockout
    pub auth_failure: RateLimitSettings,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Operator secret for `/admin` routes (None = admin routes not mounted)
    pub admin_api_key: Option<String>,

    /// Allowed CORS origins. `*` allows all (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// Trusted reverse proxy CIDR ranges.
    ///
    /// Format: comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12").
    /// Empty trusts forwarded headers from every source.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "keygate=debug")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a value does not parse or fails
    /// [`validate`](Config::validate).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,

            // Key store
            database_url: Self::non_empty_env("DATABASE_URL"),
            api_key_prefix: env::var("API_KEY_PREFIX").unwrap_or(defaults.api_key_prefix),

            // Rate limiting
            rate_limit_enabled: Self::parse_env("RATE_LIMIT_ENABLED", defaults.rate_limit_enabled)?,
            rate_limit_api: Self::parse_rate_limit("RATE_LIMIT_API", defaults.rate_limit_api)?,
            rate_limit_contact: Self::parse_rate_limit(
                "RATE_LIMIT_CONTACT",
                defaults.rate_limit_contact,
            )?,
            rate_limit_analytics: Self::parse_rate_limit(
                "RATE_LIMIT_ANALYTICS",
                defaults.rate_limit_analytics,
            )?,
            rate_limit_admin: Self::parse_rate_limit("RATE_LIMIT_ADMIN", defaults.rate_limit_admin)?,
            rate_limit_sweep_interval: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_MS",
                60_000,
            )?),
            auth_failure: RateLimitSettings {
                max_requests: Self::parse_env("AUTH_FAILURE_LIMIT", defaults.auth_failure.max_requests)?,
                window: Duration::from_millis(Self::parse_env("AUTH_FAILURE_WINDOW_MS", 60_000)?),
            },

            // Security
            admin_api_key: Self::non_empty_env("ADMIN_API_KEY"),
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS")
                .unwrap_or(defaults.cors_allowed_origins),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES").unwrap_or_default(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: Self::parse_env("LOG_FORMAT", defaults.log_format)?,
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Check values for consistency.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` describing the first invalid setting.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_enabled {
            for (name, settings) in [
                ("RATE_LIMIT_API", &self.rate_limit_api),
                ("RATE_LIMIT_CONTACT", &self.rate_limit_contact),
                ("RATE_LIMIT_ANALYTICS", &self.rate_limit_analytics),
                ("RATE_LIMIT_ADMIN", &self.rate_limit_admin),
            ] {
                settings
                    .policy()
                    .map_err(|e| AppError::ConfigError(format!("{name}: {e}")))?;
            }
        }

        self.auth_failure
            .policy()
            .map_err(|e| AppError::ConfigError(format!("AUTH_FAILURE_LIMIT: {e}")))?;

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.api_key_prefix.len() > MAX_KEY_PREFIX_LEN
            || !self
                .api_key_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::ConfigError(format!(
                "API_KEY_PREFIX must be at most {MAX_KEY_PREFIX_LEN} characters of [A-Za-z0-9_-]"
            )));
        }

        if let Some(key) = &self.admin_api_key
            && key.len() < MIN_ADMIN_KEY_LEN
        {
            return Err(AppError::ConfigError(format!(
                "ADMIN_API_KEY must be at least {MIN_ADMIN_KEY_LEN} characters"
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn admin_enabled(&self) -> bool {
        self.admin_api_key.is_some()
    }

    /// Whether forwarded headers are restricted to an allowlist of proxies.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Metrics endpoint address, or `None` when disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Read `{prefix}_MAX` and `{prefix}_WINDOW_MS`.
    fn parse_rate_limit(prefix: &str, default: RateLimitSettings) -> AppResult<RateLimitSettings> {
        let window_ms: u64 = Self::parse_env(
            &format!("{prefix}_WINDOW_MS"),
            u64::try_from(default.window.as_millis()).unwrap_or(u64::MAX),
        )?;
        Ok(RateLimitSettings {
            max_requests: Self::parse_env(&format!("{prefix}_MAX"), default.max_requests)?,
            window: Duration::from_millis(window_ms),
        })
    }

    fn non_empty_env(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Comma-separated list; `None` when the variable is unset or empty.
    fn parse_list(name: &str) -> Option<Vec<String>> {
        Self::non_empty_env(name).map(|s| {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 64 * 1024,
            // Key store
            database_url: None,
            api_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            // Rate limiting
            rate_limit_enabled: true,
            rate_limit_api: RateLimitSettings::new(100, 60_000),
            rate_limit_contact: RateLimitSettings::new(5, 900_000),
            rate_limit_analytics: RateLimitSettings::new(300, 60_000),
            rate_limit_admin: RateLimitSettings::new(30, 60_000),
            rate_limit_sweep_interval: Duration::from_secs(60),
            auth_failure: RateLimitSettings::new(10, 60_000),
            // Security
            admin_api_key: None,
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}
