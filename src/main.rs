use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use keygate::config::LogFormat;
use keygate::store::{ApiKeyStore, MemoryApiKeyStore, SqliteApiKeyStore};
use keygate::{AppState, Config, SystemClock, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // Initialize logging with whatever settings loaded, so config errors are logged too
    let (log_level, log_format) = match &config {
        Ok(config) => (config.log_level.as_str(), config.log_format),
        Err(_) => ("info", LogFormat::default()),
    };
    init_tracing(log_level, log_format);

    info!("Starting keygate v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        rate_limit_enabled = config.rate_limit_enabled,
        admin_enabled = config.admin_enabled(),
        "Configuration loaded"
    );

    // Key store
    let store: Arc<dyn ApiKeyStore> = match &config.database_url {
        Some(url) => {
            info!("Opening SQLite key store...");
            let store = SqliteApiKeyStore::connect(url).await.map_err(|e| {
                error!("Failed to open key store: {e}");
                exitcode::UNAVAILABLE
            })?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, API keys are kept in memory and lost on restart");
            Arc::new(MemoryApiKeyStore::new())
        }
    };

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    if !config.proxy_validation_enabled() {
        warn!(
            "TRUSTED_PROXIES not set, X-Forwarded-For is trusted from any client. \
             Set it when running behind a load balancer"
        );
    }

    // Build application state and router
    let state = AppState::new(config.clone(), store, Arc::new(SystemClock));
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET    /health                    - Health check");
    info!("  GET    /ready                     - Readiness check");
    info!("  POST   /contact                   - Contact form");
    info!("  POST   /analytics/events          - Analytics event");
    info!("  GET    /api/me                    - Authenticated principal");
    info!("  GET    /api/stats                 - Service statistics");
    info!("  GET    /api/keys                  - List own keys");
    info!("  POST   /api/keys                  - Create key");
    info!("  DELETE /api/keys/{{id}}             - Revoke key");
    info!("  POST   /api/keys/{{id}}/deactivate  - Deactivate key");

    // Peer addresses are needed to resolve client IPs
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
