//! Tally API Server Entry Point
//!
//! Loads configuration from the environment, opens the cache store and
//! warehouse pool, and starts the Axum HTTP server.

use std::sync::Arc;

use axum::Router;
use tally_api::telemetry::init_logging;
use tally_api::{
    build_pipeline, create_router, open_cache_store, ApiConfig, ApiError, ApiResult, AppState,
    CacheBackend, PgWarehouse, WarehouseConfig,
};
use tally_enrich::ProviderConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_logging()?;

    let api_config = ApiConfig::from_env()?;
    let warehouse_config = WarehouseConfig::from_env()?;
    let cache_backend = CacheBackend::from_env()?;
    let provider_config = ProviderConfig::from_env()?;

    let store = open_cache_store(&cache_backend)?;
    let warehouse = PgWarehouse::from_config(&warehouse_config)?;
    tracing::info!(
        host = %warehouse_config.host,
        dbname = %warehouse_config.dbname,
        pool_size = warehouse_config.max_size,
        "Warehouse pool configured"
    );

    let pipeline = build_pipeline(store, Arc::new(warehouse), provider_config)?;
    let app: Router = create_router(AppState::new(pipeline), &api_config);

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting Tally API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
