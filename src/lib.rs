// Database modules
mod common;
pub mod config;
pub mod db;
pub mod db_sync;
pub mod db_types;
pub mod error;
mod mysql;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use config::ServerConfig;
use db::connections::MySqlConnector;
use db_sync::locks::DestinationLocks;
use db_sync::settings::SqliteSettingsStore;
use db_types::AppState;

/// Builds the shared state and serves the sync API until the process stops.
pub async fn run(config: ServerConfig) -> Result<(), String> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| format!("Failed to create data directory {}: {}", data_dir.display(), e))?;

    let encryption_key = db::crypto::initialize_key(&data_dir)?;
    let pool = common::storage::init_local_db(&data_dir).await?;
    let settings = SqliteSettingsStore::new(pool).await?;
    let sync_config = config.sync_config();

    let state = AppState {
        connector: Arc::new(MySqlConnector::new(sync_config.connect_timeout)),
        config: Arc::new(sync_config),
        settings: Arc::new(settings),
        encryption_key: Arc::new(encryption_key),
        locks: DestinationLocks::new(),
    };

    let app = db_sync::commands::router(state);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", config.bind, e))?;
    log::info!(
        "sitesync listening on http://{} (data directory {})",
        config.bind,
        data_dir.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("Server error: {}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
