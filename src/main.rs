use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hrdesk::config::Config;
use hrdesk::engine::{spawn_auto_checkout_task, SystemClock};
use hrdesk::AppState;

#[derive(Parser, Debug)]
#[command(name = "hrdesk")]
#[command(author, version, about = "Workforce administration backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "hrdesk.toml", env = "HRDESK_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting hrdesk v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;

    // Initialize database
    let db = hrdesk::db::init(&config.server.data_dir).await?;
    hrdesk::db::seed_system_roles(&db).await?;
    hrdesk::db::ensure_admin_user(&db, &config.auth).await?;

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), db, Arc::new(SystemClock))?);

    // Nightly auto-checkout
    spawn_auto_checkout_task(state.attendance.clone(), config.attendance.clone());

    // Create API router
    let mut app = hrdesk::api::create_router(state);

    // Serve a bundled frontend with SPA fallback when configured
    if let Some(static_dir) = &config.server.static_dir {
        let index_file = static_dir.join("index.html");
        let serve_static = ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file));
        app = app.fallback_service(serve_static);
        tracing::info!("Serving static files from {}", static_dir.display());
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
