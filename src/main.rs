//! pgroute - Self-hosted project connection routing
//!
//! Resolves which database credentials each project connects with, falling
//! back to the administrative credentials from the environment when a
//! project's own are incomplete, and keeps one connection pool per
//! (database, read-only) pair.
//!
//! On startup the system database, analytics schema, template database and
//! project registry table are created if they do not exist yet.

mod config;
mod connection_string;
mod credentials;
mod db;
mod error;
mod init;
mod models;
mod pool;
mod routes;
mod state;

use crate::config::Settings;
use crate::init::{DatabaseInitializer, InitStep, PgCatalog, SchemaScripts, StepAction};
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting pgroute...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    // Bring the server's databases and schemas up to date before serving
    let scripts = SchemaScripts::load(&settings.init.scripts_dir).await?;
    let catalog = PgCatalog::new(settings.database.target(), settings.pool.connect_timeout);
    let initializer = DatabaseInitializer::new(
        catalog,
        settings.init.clone(),
        settings.database.database.clone(),
        scripts,
    );
    let report = match initializer.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("❌ FATAL: Database initialization failed: {}", e);
            return Err(e.into());
        }
    };
    if let Some(StepAction::MigrationFailed(cause)) = report.action(InitStep::TemplateSchemasOrMigration) {
        warn!("⚠️  Serving with an unmigrated template database: {}", cause);
    }

    let admin_pool = db::connect_admin_pool(&settings.database, &settings.pool).await?;
    info!("✅ Database pool created successfully");

    let state = Arc::new(AppState::new(admin_pool, settings.pool.clone()));

    // Build the router
    let app = create_router(state.clone(), &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET    /health                               - Liveness");
    info!("   GET    /api/projects/:ref/connection-string  - Project connection string");
    info!("   POST   /api/connection-string/parse          - Parse a connection string");
    info!("   GET    /api/projects/:ref/pools              - Pool stats for a project");
    info!("   POST   /api/projects/:ref/pools              - Open and check a project pool");
    info!("   GET    /api/pools                            - All open pools");
    info!("   GET    /api/fallback-usage                   - Recent fallback events");
    info!("   GET    /api/fallback-usage/stats             - Fallback statistics");
    info!("   DELETE /api/fallback-usage                   - Clear fallback events");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown().await;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pgroute=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
