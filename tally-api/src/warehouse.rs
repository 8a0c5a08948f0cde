//! Warehouse Connection Pool Module
//!
//! PostgreSQL-protocol query execution through a deadpool-postgres pool.
//! Each rendered query is wrapped as `SELECT row_to_json(q) FROM (<sql>) q`
//! so every row comes back as one JSON object regardless of its columns.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use tally_core::{Binding, ConfigError, QueryExecutor, RenderedQuery, Row, WarehouseError};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::telemetry::metrics;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Warehouse connection pool configuration.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    /// Database name
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Longest wait for a pooled connection.
    pub checkout_timeout: Duration,
    /// Upper bound on one query, checkout included.
    pub query_timeout: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "analytics".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            checkout_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(30),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl WarehouseConfig {
    /// Load from environment variables.
    ///
    /// - `TALLY_WAREHOUSE_HOST` (default: localhost)
    /// - `TALLY_WAREHOUSE_PORT` (default: 5432)
    /// - `TALLY_WAREHOUSE_NAME` (default: analytics)
    /// - `TALLY_WAREHOUSE_USER` (default: postgres)
    /// - `TALLY_WAREHOUSE_PASSWORD`
    /// - `TALLY_WAREHOUSE_POOL_SIZE` (default: 16)
    /// - `TALLY_WAREHOUSE_QUERY_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_size = parse_env::<usize>("TALLY_WAREHOUSE_POOL_SIZE")?.unwrap_or(defaults.max_size);
        if max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_WAREHOUSE_POOL_SIZE".to_string(),
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }

        Ok(Self {
            host: std::env::var("TALLY_WAREHOUSE_HOST").unwrap_or(defaults.host),
            port: parse_env("TALLY_WAREHOUSE_PORT")?.unwrap_or(defaults.port),
            dbname: std::env::var("TALLY_WAREHOUSE_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("TALLY_WAREHOUSE_USER").unwrap_or(defaults.user),
            password: std::env::var("TALLY_WAREHOUSE_PASSWORD").unwrap_or_default(),
            max_size,
            checkout_timeout: defaults.checkout_timeout,
            query_timeout: parse_env::<u64>("TALLY_WAREHOUSE_QUERY_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.query_timeout),
        })
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are opened lazily on first checkout.
    pub fn create_pool(&self) -> Result<Pool, WarehouseError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = Some(self.checkout_timeout);
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| WarehouseError::Pool {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// QUERY EXECUTOR
// ============================================================================

/// [`QueryExecutor`] over a pooled PostgreSQL-protocol warehouse.
#[derive(Clone)]
pub struct PgWarehouse {
    pool: Pool,
    query_timeout: Duration,
}

impl PgWarehouse {
    pub fn new(pool: Pool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    pub fn from_config(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        Ok(Self::new(config.create_pool()?, config.query_timeout))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, WarehouseError> {
        self.pool.get().await.map_err(pool_error)
    }

    async fn run(&self, query: &RenderedQuery) -> Result<Vec<Row>, WarehouseError> {
        let client = self.get_conn().await?;
        let sql = wrap_as_json(&query.sql);
        let params: Vec<&(dyn ToSql + Sync)> = query.bindings.iter().map(to_sql).collect();

        let rows = client
            .query(sql.as_str(), &params)
            .await
            .map_err(|e| query_error(&query.name, e))?;

        rows.iter()
            .map(|row| {
                let value: JsonValue = row.try_get(0).map_err(|e| query_error(&query.name, e))?;
                match value {
                    JsonValue::Object(map) => Ok(map),
                    other => Err(WarehouseError::Query {
                        query: query.name.clone(),
                        reason: format!("expected a JSON object row, got {}", other),
                    }),
                }
            })
            .collect()
    }
}

#[async_trait]
impl QueryExecutor for PgWarehouse {
    async fn execute(&self, query: &RenderedQuery) -> Result<Vec<Row>, WarehouseError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.query_timeout, self.run(query)).await {
            Ok(result) => result,
            Err(_) => Err(WarehouseError::Timeout {
                query: query.name.clone(),
                elapsed: start.elapsed(),
            }),
        };
        let elapsed = start.elapsed();

        if let Some(metrics) = metrics() {
            metrics.record_query(&query.name, result.is_ok(), elapsed.as_secs_f64());
        }
        match &result {
            Ok(rows) => tracing::debug!(
                query = %query.name,
                rows = rows.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Warehouse query completed"
            ),
            Err(e) => tracing::warn!(
                query = %query.name,
                error = %e,
                duration_ms = elapsed.as_millis() as u64,
                "Warehouse query failed"
            ),
        }
        result
    }

    async fn ping(&self) -> Result<(), WarehouseError> {
        let client = self.get_conn().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| WarehouseError::Connection {
                reason: e.to_string(),
            })
    }
}

fn wrap_as_json(sql: &str) -> String {
    format!("SELECT row_to_json(q) FROM ({}) q", sql.trim().trim_end_matches(';'))
}

fn to_sql(binding: &Binding) -> &(dyn ToSql + Sync) {
    match binding {
        Binding::Text(value) => value,
        Binding::Int(value) => value,
        Binding::Date(value) => value,
        Binding::TextList(values) => values,
    }
}

fn pool_error(err: PoolError) -> WarehouseError {
    match err {
        PoolError::Timeout(_) => WarehouseError::Pool {
            reason: err.to_string(),
        },
        other => WarehouseError::Connection {
            reason: other.to_string(),
        },
    }
}

fn query_error(query: &str, err: tokio_postgres::Error) -> WarehouseError {
    if err.is_closed() {
        return WarehouseError::Connection {
            reason: err.to_string(),
        };
    }
    let reason = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());
    WarehouseError::Query {
        query: query.to_string(),
        reason,
    }
}
