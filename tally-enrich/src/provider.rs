//! External data provider contract.

use async_trait::async_trait;
use serde_json::Value;

/// Failure fetching one key from the provider.
///
/// These never fail a request: the engine records them and leaves the
/// affected row fields null.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("no data for key '{key}'")]
    NotFound { key: String },

    #[error("provider returned HTTP {status} for key '{key}'")]
    Status { key: String, status: u16 },

    #[error("request for key '{key}' failed: {reason}")]
    Transport { key: String, reason: String },

    #[error("response for key '{key}' is not valid JSON: {reason}")]
    Decode { key: String, reason: String },
}

/// Source of per-key structured data used to enrich rows.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str {
        "provider"
    }

    /// Fetch the value for one key.
    ///
    /// Callers bound each call with their own timeout; implementations may
    /// also enforce one.
    async fn fetch(&self, key: &str) -> Result<Value, ProviderError>;
}
