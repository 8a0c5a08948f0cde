//! HTTP data provider.
//!
//! Resolves a URL template per key (`{key}` is replaced by the URL-encoded
//! key) and decodes the JSON response body.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tally_core::ConfigError;

use crate::engine::DEFAULT_FETCH_TIMEOUT;
use crate::provider::{DataProvider, ProviderError};

/// Placeholder substituted with the key.
pub const KEY_PLACEHOLDER: &str = "{key}";

const DEFAULT_USER_AGENT: &str = concat!("tally/", env!("CARGO_PKG_VERSION"));

/// HTTP provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// URL template containing `{key}`.
    pub url_template: String,
    /// Per-call timeout, also applied by the engine.
    pub timeout: Duration,
    pub user_agent: String,
}

impl ProviderConfig {
    pub fn new(url_template: impl Into<String>) -> Result<Self, ConfigError> {
        let url_template = url_template.into();
        if !url_template.contains(KEY_PLACEHOLDER) {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_ENRICH_URL".to_string(),
                value: url_template,
                reason: format!("must contain {}", KEY_PLACEHOLDER),
            });
        }
        Ok(Self {
            url_template,
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load from environment variables.
    ///
    /// Returns `Ok(None)` when `TALLY_ENRICH_URL` is unset or empty, which
    /// disables enrichment.
    ///
    /// - `TALLY_ENRICH_URL`: URL template containing `{key}`
    /// - `TALLY_ENRICH_TIMEOUT_MS`: per-call timeout (default 3000)
    /// - `TALLY_ENRICH_USER_AGENT`: User-Agent header
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let url = match std::env::var("TALLY_ENRICH_URL") {
            Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => return Ok(None),
        };

        let mut config = Self::new(url)?;

        if let Ok(raw) = std::env::var("TALLY_ENRICH_TIMEOUT_MS") {
            let millis = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "TALLY_ENRICH_TIMEOUT_MS".to_string(),
                    value: raw.clone(),
                    reason: "expected a positive number of milliseconds".to_string(),
                })?;
            config.timeout = Duration::from_millis(millis);
        }

        if let Ok(agent) = std::env::var("TALLY_ENRICH_USER_AGENT") {
            if !agent.trim().is_empty() {
                config.user_agent = agent.trim().to_string();
            }
        }

        Ok(Some(config))
    }

    /// URL for `key`.
    pub fn resolve_url(&self, key: &str) -> String {
        self.url_template
            .replace(KEY_PLACEHOLDER, &urlencoding::encode(key))
    }
}

/// reqwest-backed [`DataProvider`].
#[derive(Debug, Clone)]
pub struct HttpDataProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpDataProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "TALLY_ENRICH_URL".to_string(),
                value: config.url_template.clone(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[async_trait]
impl DataProvider for HttpDataProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, key: &str) -> Result<Value, ProviderError> {
        let url = self.config.resolve_url(key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_requires_placeholder() {
        let err = ProviderConfig::new("https://api.llama.fi/protocol/").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(err.to_string().contains("{key}"));
    }

    #[test]
    fn test_resolve_url_encodes_key() {
        let config = ProviderConfig::new("https://api.llama.fi/protocol/{key}").unwrap();
        assert_eq!(
            config.resolve_url("camelot-v3"),
            "https://api.llama.fi/protocol/camelot-v3"
        );
        assert_eq!(
            config.resolve_url("a b/c"),
            "https://api.llama.fi/protocol/a%20b%2Fc"
        );
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::new("http://localhost/{key}")
            .unwrap()
            .with_timeout(Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert!(config.user_agent.starts_with("tally/"));

        let provider = HttpDataProvider::new(config).unwrap();
        assert_eq!(provider.name(), "http");
        assert_eq!(provider.config().url_template, "http://localhost/{key}");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let config = ProviderConfig::new("http://127.0.0.1:9/{key}")
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        let provider = HttpDataProvider::new(config).unwrap();

        let err = provider.fetch("gmx").await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }
}
