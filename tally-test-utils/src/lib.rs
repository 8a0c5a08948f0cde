//! Tally Test Utilities
//!
//! Shared test infrastructure for the Tally workspace:
//! - A counting fake warehouse executor
//! - A scripted enrichment provider
//! - Proptest generators for request arguments
//! - Fixtures for common scenarios

pub use tally_core::{
    Binding, ManualClock, ParameterSet, QueryExecutor, RawParams, RenderedQuery, Row,
    Timeframe, WarehouseError,
};
pub use tally_enrich::{DataProvider, ProviderError};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// FAKE WAREHOUSE
// ============================================================================

/// Warehouse fake with canned rows per query name.
///
/// Unknown query names return no rows. Every call is recorded, including
/// failed ones.
#[derive(Debug, Default)]
pub struct CountingExecutor {
    rows: HashMap<String, Vec<Row>>,
    failures: HashMap<String, String>,
    unavailable: AtomicBool,
    executed: Mutex<Vec<RenderedQuery>>,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned rows for `query`. Non-object values are skipped.
    pub fn with_rows(mut self, query: &str, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.rows.insert(query.to_string(), rows);
        self
    }

    /// Make `query` fail with a query error.
    pub fn with_failure(mut self, query: &str, reason: &str) -> Self {
        self.failures.insert(query.to_string(), reason.to_string());
        self
    }

    /// Toggle a connection failure for every query and ping.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total calls to `execute`.
    pub fn calls(&self) -> usize {
        lock(&self.executed).len()
    }

    pub fn calls_for(&self, query: &str) -> usize {
        lock(&self.executed).iter().filter(|q| q.name == query).count()
    }

    /// Every query received, in call order.
    pub fn executed(&self) -> Vec<RenderedQuery> {
        lock(&self.executed).clone()
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn execute(&self, query: &RenderedQuery) -> Result<Vec<Row>, WarehouseError> {
        lock(&self.executed).push(query.clone());

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WarehouseError::Connection {
                reason: "connection refused".to_string(),
            });
        }
        if let Some(reason) = self.failures.get(&query.name) {
            return Err(WarehouseError::Query {
                query: query.name.clone(),
                reason: reason.clone(),
            });
        }
        Ok(self.rows.get(&query.name).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), WarehouseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WarehouseError::Connection {
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SCRIPTED PROVIDER
// ============================================================================

/// Enrichment provider with a fixed delay and outcome per key.
///
/// Keys without a script answer `NotFound` immediately.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: HashMap<String, (Duration, Result<Value, ProviderError>)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, key: &str, value: Value) -> Self {
        self.respond_after(key, Duration::ZERO, value)
    }

    pub fn respond_after(mut self, key: &str, delay: Duration, value: Value) -> Self {
        self.script.insert(key.to_string(), (delay, Ok(value)));
        self
    }

    pub fn fail(mut self, key: &str, error: ProviderError) -> Self {
        self.script.insert(key.to_string(), (Duration::ZERO, Err(error)));
        self
    }

    pub fn calls_for(&self, key: &str) -> usize {
        lock(&self.calls).iter().filter(|k| k.as_str() == key).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, key: &str) -> Result<Value, ProviderError> {
        lock(&self.calls).push(key.to_string());

        match self.script.get(key) {
            Some((delay, outcome)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                outcome.clone()
            }
            None => Err(ProviderError::NotFound {
                key: key.to_string(),
            }),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for request arguments.

    use proptest::prelude::*;

    /// Timeframe argument as a client might send it, valid or not.
    pub fn arb_timeframe_arg() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("day".to_string()),
            Just(" Week ".to_string()),
            Just("MONTH".to_string()),
            Just("year".to_string()),
            Just(String::new()),
        ]
    }

    /// Entity names usable as exclusions.
    pub fn arb_entity_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    /// Exclusion list, possibly with duplicates.
    pub fn arb_exclusions() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_entity_name(), 0..6)
    }

    /// Lookback argument as a client might send it.
    pub fn arb_lookback_arg() -> impl Strategy<Value = String> {
        prop_oneof![
            (1u32..200).prop_map(|n| n.to_string()),
            Just("0".to_string()),
            Just("-3".to_string()),
            Just("six".to_string()),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    /// Build raw request arguments from pairs, in order.
    pub fn raw(pairs: &[(&str, &str)]) -> RawParams {
        pairs.iter().copied().collect()
    }

    /// A manual clock at 2024-05-20 12:00 UTC.
    pub fn fixed_clock() -> Arc<ManualClock> {
        let start = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).single().unwrap_or_else(Utc::now);
        Arc::new(ManualClock::new(start))
    }

    /// Leaderboard rows keyed by `SLUG`, two of which share a key.
    pub fn leaderboard_rows() -> Vec<Value> {
        vec![
            serde_json::json!({"PROJECT": "GMX", "SLUG": "gmx", "WALLETS": 5200}),
            serde_json::json!({"PROJECT": "GMX v2", "SLUG": "gmx", "WALLETS": 3100}),
            serde_json::json!({"PROJECT": "Camelot", "SLUG": "camelot", "WALLETS": 1800}),
            serde_json::json!({"PROJECT": "Vela", "SLUG": "vela", "WALLETS": 400}),
        ]
    }
}
