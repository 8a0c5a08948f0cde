//! Tally API - Memoized Dashboard Read Layer
//!
//! Serves analytics dashboards over HTTP. Each request is normalized,
//! fingerprinted, and answered from the memoization cache or by running
//! the route's warehouse queries (plus optional enrichment) and storing
//! the result.

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod template;
pub mod warehouse;

use std::sync::Arc;

use tally_cache::{CacheStore, LmdbStore, MemoCache, MemoryStore};
use tally_core::QueryExecutor;
use tally_enrich::{HttpDataProvider, ProviderConfig};

// Re-export commonly used types
pub use assembler::ResponseAssembler;
pub use catalog::{RouteCatalog, RouteSpec};
pub use config::{ApiConfig, CacheBackend};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use pipeline::DashboardPipeline;
pub use routes::create_router;
pub use state::AppState;
pub use warehouse::{PgWarehouse, WarehouseConfig};

/// Open the configured cache store.
pub fn open_cache_store(backend: &CacheBackend) -> ApiResult<Arc<dyn CacheStore>> {
    match backend {
        CacheBackend::Memory => {
            tracing::warn!("Using in-memory cache store; entries are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        CacheBackend::Lmdb { path, max_size_mb } => {
            std::fs::create_dir_all(path).map_err(|e| {
                ApiError::internal_error(format!("Failed to create {}: {}", path.display(), e))
            })?;
            let store = LmdbStore::open(path, *max_size_mb).map_err(tally_core::CacheStoreError::from)?;
            tracing::info!(path = %path.display(), max_size_mb, "Opened LMDB cache store");
            Ok(Arc::new(store))
        }
    }
}

/// Wire the pipeline from its parts and the built-in dashboard catalog.
///
/// Enrichment is enabled only when `provider` is given; enriched routes
/// otherwise return null enrichment fields.
pub fn build_pipeline(
    store: Arc<dyn CacheStore>,
    executor: Arc<dyn QueryExecutor>,
    provider: Option<ProviderConfig>,
) -> ApiResult<DashboardPipeline> {
    let mut assembler = ResponseAssembler::new(executor);
    match provider {
        Some(config) => {
            let timeout = config.timeout;
            tracing::info!(url_template = %config.url_template, "Enrichment provider enabled");
            assembler = assembler.with_provider(Arc::new(HttpDataProvider::new(config)?), timeout);
        }
        None => tracing::info!("No enrichment provider configured"),
    }

    Ok(DashboardPipeline::new(
        RouteCatalog::dashboards(),
        MemoCache::new(store),
        assembler,
    ))
}
