//! Billing batch server - main application entry point.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Pick the backends: PostgreSQL (pool + migrations) when `DATABASE_URL`
//!    is set, in-memory otherwise
//! 3. Wire services, worker and router
//! 4. Start the batch worker (unless `WORKER_ENABLED=false`)
//! 5. Serve HTTP until Ctrl-C, then stop the worker

use std::sync::Arc;

use billing_batch_server::{
    app::{AppSettings, Application},
    config::Config,
    db,
    queue::{JobQueue, MemoryJobQueue, PgJobQueue},
    store::{BillingStore, MemoryStore, PgStore},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let (store, queue): (Arc<dyn BillingStore>, Arc<dyn JobQueue>) = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            (
                Arc::new(PgStore::new(pool.clone())),
                Arc::new(PgJobQueue::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store and queue");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryJobQueue::new()))
        }
    };

    let settings = AppSettings::from_config(&config);
    if settings.api_keys.is_disabled() {
        tracing::warn!("API key authentication is disabled");
    } else if settings.api_keys.is_empty() {
        tracing::warn!("No API_KEY_HASHES configured, every protected request will be rejected");
    }

    let application = Application::new(store, queue, settings);
    let router = application.router();

    let shutdown = CancellationToken::new();
    let worker_handle = if config.worker_enabled {
        Some(tokio::spawn(
            application.worker.clone().run(shutdown.child_token()),
        ))
    } else {
        tracing::info!("Batch worker disabled");
        None
    };

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        handle.await?;
    }

    Ok(())
}
