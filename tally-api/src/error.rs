//! Error Types for the Tally API
//!
//! This module defines error handling for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//! - Conversion from the core [`TallyError`] taxonomy
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.
//! Upstream details are logged, never returned to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_core::{CacheStoreError, ConfigError, TallyError, WarehouseError};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// No dashboard route is registered at the requested path
    RouteNotFound,

    // ========================================================================
    // Upstream Errors (500, 503, 504)
    // ========================================================================
    /// The warehouse cannot be reached
    WarehouseUnavailable,

    /// Warehouse connection pool exhausted
    ConnectionPoolExhausted,

    /// A warehouse query failed
    QueryFailed,

    /// The cache store cannot be used
    CacheUnavailable,

    /// A cache read or write failed
    CacheError,

    /// Enrichment could not run on the result set
    EnrichmentFailed,

    /// Operation timed out
    Timeout,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// Route or service configuration is invalid
    ConfigurationError,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::RouteNotFound => StatusCode::NOT_FOUND,

            ErrorCode::WarehouseUnavailable
            | ErrorCode::ConnectionPoolExhausted
            | ErrorCode::CacheUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::QueryFailed
            | ErrorCode::CacheError
            | ErrorCode::EnrichmentFailed
            | ErrorCode::ConfigurationError
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::RouteNotFound => "Route not found",
            ErrorCode::WarehouseUnavailable => "Data warehouse unavailable",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
            ErrorCode::QueryFailed => "Warehouse query failed",
            ErrorCode::CacheUnavailable => "Cache store unavailable",
            ErrorCode::CacheError => "Cache operation failed",
            ErrorCode::EnrichmentFailed => "Result enrichment failed",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::ConfigurationError => "Service misconfigured",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn route_not_found(route: &str) -> Self {
        Self::new(ErrorCode::RouteNotFound, format!("No dashboard route at '{}'", route))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a Timeout error.
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<WarehouseError> for ApiError {
    fn from(err: WarehouseError) -> Self {
        tracing::error!(error = %err, "Warehouse error");
        match err {
            WarehouseError::Connection { .. } => ApiError::from_code(ErrorCode::WarehouseUnavailable),
            WarehouseError::Pool { .. } => ApiError::from_code(ErrorCode::ConnectionPoolExhausted),
            WarehouseError::Query { .. } => ApiError::from_code(ErrorCode::QueryFailed),
            WarehouseError::Timeout { query, .. } => ApiError::timeout(&query),
        }
    }
}

impl From<CacheStoreError> for ApiError {
    fn from(err: CacheStoreError) -> Self {
        tracing::error!(error = %err, "Cache store error");
        match err {
            CacheStoreError::Unavailable { .. } => ApiError::from_code(ErrorCode::CacheUnavailable),
            CacheStoreError::Transaction { .. }
            | CacheStoreError::Full { .. }
            | CacheStoreError::Corrupt { .. } => {
                ApiError::from_code(ErrorCode::CacheError)
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!(error = %err, "Configuration error");
        ApiError::from_code(ErrorCode::ConfigurationError)
    }
}

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        match err {
            TallyError::Warehouse(e) => e.into(),
            TallyError::Cache(e) => e.into(),
            TallyError::Config(e) => e.into(),
            TallyError::Enrichment(e) => {
                tracing::error!(error = %e, "Enrichment error");
                ApiError::from_code(ErrorCode::EnrichmentFailed)
            }
            TallyError::UnknownRoute { route } => ApiError::route_not_found(&route),
            TallyError::Serialization { reason } => {
                tracing::error!(reason = %reason, "Serialization error");
                ApiError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
