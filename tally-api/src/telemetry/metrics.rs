//! Prometheus Metrics Definitions
//!
//! Defines the Tally metrics with their labels and exposes a /metrics
//! endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Warehouse query latency buckets (seconds). Analytical queries run long.
const QUERY_LATENCY_BUCKETS: &[f64] = &[0.005, 0.025, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance - initialized on first use.
pub static METRICS: Lazy<ApiResult<TallyMetrics>> = Lazy::new(TallyMetrics::new);

/// The registered metrics, or `None` if registration failed.
///
/// Registration failure is logged once; recording then becomes a no-op.
pub fn metrics() -> Option<&'static TallyMetrics> {
    match METRICS.as_ref() {
        Ok(metrics) => Some(metrics),
        Err(_) => None,
    }
}

/// Container for all Tally metrics.
#[derive(Clone)]
pub struct TallyMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Memoization lookups - labels: route, outcome (hit/miss)
    pub cache_lookups_total: CounterVec,

    /// Warehouse query counter - labels: query, status
    pub warehouse_queries_total: CounterVec,

    /// Warehouse query duration histogram - labels: query
    pub warehouse_query_duration_seconds: HistogramVec,

    /// Enrichment fetch outcomes - labels: route, status (success/failure/timeout)
    pub enrichment_fetches_total: CounterVec,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    tracing::error!(metric = name, error = %e, "Failed to register metric");
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl TallyMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "tally_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "tally_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            cache_lookups_total: register_counter_vec!(
                "tally_cache_lookups_total",
                "Memoization cache lookups by outcome",
                &["route", "outcome"]
            )
            .map_err(|e| registration_error("cache_lookups_total", e))?,

            warehouse_queries_total: register_counter_vec!(
                "tally_warehouse_queries_total",
                "Total number of warehouse queries",
                &["query", "status"]
            )
            .map_err(|e| registration_error("warehouse_queries_total", e))?,

            warehouse_query_duration_seconds: register_histogram_vec!(
                "tally_warehouse_query_duration_seconds",
                "Warehouse query duration in seconds",
                &["query"],
                QUERY_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("warehouse_query_duration_seconds", e))?,

            enrichment_fetches_total: register_counter_vec!(
                "tally_enrichment_fetches_total",
                "Enrichment fetches by outcome",
                &["route", "status"]
            )
            .map_err(|e| registration_error("enrichment_fetches_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_cache_lookup(&self, route: &str, outcome: &str) {
        self.cache_lookups_total
            .with_label_values(&[route, outcome])
            .inc();
    }

    /// Record a warehouse query.
    pub fn record_query(&self, query: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.warehouse_queries_total
            .with_label_values(&[query, status])
            .inc();
        self.warehouse_query_duration_seconds
            .with_label_values(&[query])
            .observe(duration_secs);
    }

    /// Record `count` enrichment fetches with the same outcome.
    pub fn record_enrichment(&self, route: &str, status: &str, count: usize) {
        if count > 0 {
            self.enrichment_fetches_total
                .with_label_values(&[route, status])
                .inc_by(count as f64);
        }
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    // Register on first scrape even if nothing was recorded yet.
    let _ = metrics();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
