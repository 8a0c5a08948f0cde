//! REST API Route Handlers
//!
//! Dashboard routes come from the catalog held by the pipeline. Health
//! checks and metrics are mounted alongside them.

pub mod dashboard;
pub mod health;

use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::ApiConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if !config.is_production() {
        // Development mode: allow all origins
        tracing::info!("CORS: Development mode - allowing all origins");
        return cors.allow_origin(Any).allow_headers(Any).expose_headers(Any);
    }

    tracing::info!(
        "CORS: Production mode - allowing origins: {:?}",
        config.cors_origins
    );
    let allowed = config.clone();
    let cors = cors
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([HeaderName::from_static(dashboard::CACHE_HEADER)])
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|origin| allowed.is_origin_allowed(origin))
                .unwrap_or(false)
        }));

    if config.cors_allow_credentials {
        cors.allow_credentials(true)
    } else {
        cors
    }
}

/// Create the complete router: every catalog route, health checks and
/// metrics, wrapped in observability and CORS layers.
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let mut router = Router::new();
    for path in state.pipeline.catalog().paths() {
        router = router.route(path, get(dashboard::get_dashboard));
    }

    router
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .fallback(dashboard::not_found)
        .with_state(state)
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer(config))
}
