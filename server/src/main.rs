//! Curare API server.
//!
//! This binary:
//! - Loads configuration from the environment (and `.env`)
//! - Connects to `PostgreSQL` and applies migrations
//! - Serves the care-request API, change feed and metrics
//! - Drains connections on Ctrl+C or SIGTERM
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/curare cargo run --bin curare-server
//! ```

use anyhow::Context;
use curare_core::environment::SystemClock;
use curare_postgres::PostgresRequestStore;
use curare_runtime::{CareService, MetricsExporter};
use curare_server::Config;
use curare_web::{AppState, router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.server.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        bind = %config.bind_address(),
        max_connections = config.database.max_connections,
        metrics = config.server.metrics_enabled,
        "Configuration loaded"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = Arc::new(PostgresRequestStore::new(pool));

    if config.database.run_migrations {
        store.migrate().await.context("Failed to run migrations")?;
        info!("Migrations applied");
    }

    let mut metrics = MetricsExporter::new();
    if config.server.metrics_enabled {
        metrics.install().context("Failed to install metrics recorder")?;
    }

    let service = Arc::new(CareService::new(
        store.clone(),
        store,
        Arc::new(SystemClock),
        config.service_config(),
    ));
    let app = router(AppState::new(service, metrics));

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!("Server listening on {}", config.bind_address());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = stop_tx.send(());

    // Open feed connections keep graceful shutdown waiting; bound it.
    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(joined) => joined.context("Server task panicked")??,
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Graceful shutdown timed out, dropping open connections"
        ),
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
