//! Tally Enrich - Concurrent Row Enrichment
//!
//! Dashboard rows that reference external entities (e.g. a protocol slug)
//! are enriched with data fetched from a [`DataProvider`]. One fetch is
//! issued per distinct key, all fetches run concurrently under a per-call
//! timeout, and results are merged once every fetch has settled.

pub mod engine;
pub mod http_provider;
pub mod provider;

pub use engine::{
    distinct_keys, enrich, fan_out, merge, null_fill, row_key, EnrichmentPlan, EnrichmentReport,
    EnrichmentResult, FetchStatus, FieldMapping, DEFAULT_FETCH_TIMEOUT,
};
pub use http_provider::{HttpDataProvider, ProviderConfig};
pub use provider::{DataProvider, ProviderError};
