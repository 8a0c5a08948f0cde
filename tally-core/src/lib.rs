//! Tally Core - Shared Types
//!
//! Request parameters, error types, the time source and the query executor
//! contract. Every other Tally crate depends on this one.

pub mod clock;
pub mod error;
pub mod executor;
pub mod params;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    CacheStoreError, ConfigError, EnrichmentError, TallyError, TallyResult, WarehouseError,
};
pub use executor::{Binding, QueryExecutor, RenderedQuery, Row};
pub use params::{
    normalize, ParamDefaults, ParameterSet, RawParams, ScopeKind, Timeframe,
    DEFAULT_LOOKBACK_MONTHS, MAX_LOOKBACK_MONTHS,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
