//! Error types for Tally operations

use std::time::Duration;
use thiserror::Error;

/// Warehouse (Query Executor) errors.
///
/// A warehouse call is all-or-nothing: any of these aborts the current
/// request and nothing is cached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("Warehouse connection failed: {reason}")]
    Connection { reason: String },

    #[error("Warehouse pool unavailable: {reason}")]
    Pool { reason: String },

    #[error("Query '{query}' failed: {reason}")]
    Query { query: String, reason: String },

    #[error("Query '{query}' timed out after {elapsed:?}")]
    Timeout { query: String, elapsed: Duration },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheStoreError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache transaction failed: {reason}")]
    Transaction { reason: String },

    /// The store has no room for another entry until expired ones are purged.
    #[error("Cache store full: {reason}")]
    Full { reason: String },

    #[error("Corrupt cache entry under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Enrichment errors that escalate to the request.
///
/// Per-key provider failures never appear here; they are recovered inside
/// the fan-out and leave the affected fields null.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("Cannot enumerate enrichment keys: {reason}")]
    KeySet { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tally errors.
#[derive(Debug, Clone, Error)]
pub enum TallyError {
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheStoreError),

    #[error("Enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown route: {route}")]
    UnknownRoute { route: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        TallyError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for Tally operations.
pub type TallyResult<T> = Result<T, TallyError>;

// =============================================================================
// TESTS
// =============================================================================
