//! Tally Telemetry - Observability Infrastructure
//!
//! Structured JSON logging and Prometheus metrics for the API layer.

pub mod logging;
pub mod metrics;
pub mod middleware;

pub use logging::{init_logging, DEFAULT_FILTER};
pub use metrics::{metrics, metrics_handler, TallyMetrics, METRICS};
pub use middleware::observability_middleware;
