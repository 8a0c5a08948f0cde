//! API Configuration Module
//!
//! Service settings loaded from environment variables with defaults suited
//! to local development. Warehouse settings live in [`crate::warehouse`],
//! enrichment settings in [`tally_enrich::ProviderConfig`].

use std::net::SocketAddr;
use std::path::PathBuf;

use tally_core::ConfigError;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP listener and CORS configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind host.
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://dash.example.com,*.example.com"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TALLY_API_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` or `TALLY_API_PORT`: Listen port (default: 8081)
    /// - `TALLY_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `TALLY_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `TALLY_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("TALLY_API_BIND").unwrap_or(defaults.host);

        let port = match std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("TALLY_API_PORT").ok())
        {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                value: raw.clone(),
                reason: "expected a port number".to_string(),
            })?,
            None => defaults.port,
        };

        let cors_origins = std::env::var("TALLY_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("TALLY_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("TALLY_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        Ok(Self {
            host,
            port,
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
        })
    }

    /// Socket address to listen on.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "TALLY_API_BIND".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Which cache store backs the memoization cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// Durable LMDB store under `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
    /// In-process store, lost on restart.
    Memory,
}

impl Default for CacheBackend {
    fn default() -> Self {
        CacheBackend::Lmdb {
            path: PathBuf::from("./data/cache"),
            max_size_mb: 512,
        }
    }
}

impl CacheBackend {
    /// Load from environment variables.
    ///
    /// - `TALLY_CACHE_BACKEND`: `lmdb` (default) or `memory`
    /// - `TALLY_CACHE_PATH`: LMDB directory (default: ./data/cache)
    /// - `TALLY_CACHE_MAX_SIZE_MB`: LMDB map size (default: 512)
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = std::env::var("TALLY_CACHE_BACKEND").unwrap_or_else(|_| "lmdb".to_string());

        match backend.trim().to_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "lmdb" => {
                let path = std::env::var("TALLY_CACHE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data/cache"));
                let max_size_mb = std::env::var("TALLY_CACHE_MAX_SIZE_MB")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|mb: &usize| *mb > 0)
                    .unwrap_or(512);
                Ok(CacheBackend::Lmdb { path, max_size_mb })
            }
            other => Err(ConfigError::InvalidValue {
                field: "TALLY_CACHE_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected lmdb or memory".to_string(),
            }),
        }
    }
}
