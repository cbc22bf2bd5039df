//! Prometheus metrics.
//!
//! Exposed on a dedicated listener (`METRICS_PORT`, `0` disables it).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `keygate_rate_limit_decisions_total` - Rate limit decisions (labels: category, outcome)
//! - `keygate_auth_attempts_total` - API key authentication attempts (label: outcome)
//! - `keygate_api_keys_issued_total` - Keys issued
//! - `keygate_rate_limit_swept_total` - Expired rate limit entries removed by the sweeper
//!
//! ## Histograms
//! - `keygate_auth_duration_seconds` - Time spent authenticating a credential
//!
//! ## Gauges
//! - `keygate_rate_limit_tracked_clients` - Identities currently held by the limiter
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so library code and tests can call them freely.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "keygate_rate_limit_decisions_total";
    pub const AUTH_ATTEMPTS_TOTAL: &str = "keygate_auth_attempts_total";
    pub const API_KEYS_ISSUED_TOTAL: &str = "keygate_api_keys_issued_total";
    pub const RATE_LIMIT_SWEPT_TOTAL: &str = "keygate_rate_limit_swept_total";
    pub const AUTH_DURATION_SECONDS: &str = "keygate_auth_duration_seconds";
    pub const RATE_LIMIT_TRACKED_CLIENTS: &str = "keygate_rate_limit_tracked_clients";
}

/// Install the Prometheus exporter and describe all metrics.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limit decisions by route category and outcome"
    );
    describe_counter!(
        names::AUTH_ATTEMPTS_TOTAL,
        "API key authentication attempts by outcome"
    );
    describe_counter!(names::API_KEYS_ISSUED_TOTAL, "API keys issued");
    describe_counter!(
        names::RATE_LIMIT_SWEPT_TOTAL,
        "Expired rate limit entries removed by the background sweeper"
    );
    describe_histogram!(
        names::AUTH_DURATION_SECONDS,
        "Time spent resolving an API key credential, in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_CLIENTS,
        "Client identities currently tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize metrics, logging failure instead of returning it.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a rate limit decision for a route category.
pub fn record_rate_limit_decision(category: &str, admitted: bool) {
    let outcome = if admitted { "admitted" } else { "rejected" };
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "category" => category.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record an authentication attempt. `outcome` is `"success"` or an
/// [`AuthError::kind`](crate::error::AuthError::kind) label.
pub fn record_auth_attempt(outcome: &'static str, duration_secs: f64) {
    counter!(names::AUTH_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::AUTH_DURATION_SECONDS).record(duration_secs);
}

pub fn record_key_issued() {
    counter!(names::API_KEYS_ISSUED_TOTAL).increment(1);
}

/// Record one sweeper pass.
pub fn record_rate_limit_sweep(removed: usize, remaining: usize) {
    counter!(names::RATE_LIMIT_SWEPT_TOTAL).increment(removed as u64);
    gauge!(names::RATE_LIMIT_TRACKED_CLIENTS).set(remaining as f64);
}
