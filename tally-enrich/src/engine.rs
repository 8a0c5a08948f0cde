//! Enrichment fan-out and merge.
//!
//! Base rows reference external entities by a key column. The engine fetches
//! one value per distinct key concurrently, waits for every fetch to finish,
//! fail, or time out, and only then merges the results back into the rows.
//! A failed or timed-out key leaves its rows in place with null fields.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tally_core::EnrichmentError;

use crate::provider::DataProvider;

/// Per-call timeout used when a plan does not set one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of fetching one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    Failure,
    Timeout,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

/// Result of fetching one key. Lives for one enrichment call.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResult {
    pub key: String,
    pub value: Option<Value>,
    pub status: FetchStatus,
}

/// Copy the value at JSON pointer `source` of the fetched document into row
/// column `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// How to enrich a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentPlan {
    /// Row column holding the entity key.
    pub key_column: String,
    /// Fields to copy. Empty means every top-level field of an object value.
    pub fields: Vec<FieldMapping>,
    pub per_call_timeout: Duration,
}

impl EnrichmentPlan {
    pub fn new(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            fields: Vec::new(),
            per_call_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_field(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.fields.push(FieldMapping::new(source, target));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }
}

/// Counts of one enrichment call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    pub distinct_keys: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub rows_without_key: usize,
}

impl EnrichmentReport {
    fn record(&mut self, status: FetchStatus) {
        match status {
            FetchStatus::Success => self.succeeded += 1,
            FetchStatus::Failure => self.failed += 1,
            FetchStatus::Timeout => self.timed_out += 1,
        }
    }
}

/// Key of a row: trimmed non-empty string, or a stringified number.
pub fn row_key(row: &Map<String, Value>, key_column: &str) -> Option<String> {
    match row.get(key_column)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Distinct keys referenced by `rows`, sorted.
///
/// # Errors
///
/// [`EnrichmentError::KeySet`] if any row is not a JSON object.
pub fn distinct_keys(rows: &[Value], key_column: &str) -> Result<Vec<String>, EnrichmentError> {
    let mut keys = BTreeSet::new();
    for (index, row) in rows.iter().enumerate() {
        let Some(object) = row.as_object() else {
            return Err(EnrichmentError::KeySet {
                reason: format!("row {} is not an object", index),
            });
        };
        if let Some(key) = row_key(object, key_column) {
            keys.insert(key);
        }
    }
    Ok(keys.into_iter().collect())
}

/// Fetch every key concurrently, each bounded by `timeout`.
///
/// Returns once all fetches have completed, failed, or timed out.
pub async fn fan_out(
    provider: &dyn DataProvider,
    keys: &[String],
    timeout: Duration,
) -> HashMap<String, EnrichmentResult> {
    let fetches = keys.iter().map(|key| async move {
        let started = Instant::now();
        let (value, status) = match tokio::time::timeout(timeout, provider.fetch(key)).await {
            Ok(Ok(value)) => (Some(value), FetchStatus::Success),
            Ok(Err(err)) => {
                tracing::warn!(
                    provider = provider.name(),
                    key = %key,
                    error = %err,
                    "Enrichment fetch failed"
                );
                (None, FetchStatus::Failure)
            }
            Err(_) => {
                tracing::warn!(
                    provider = provider.name(),
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Enrichment fetch timed out"
                );
                (None, FetchStatus::Timeout)
            }
        };
        tracing::trace!(
            key = %key,
            status = status.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Enrichment fetch finished"
        );
        EnrichmentResult {
            key: key.clone(),
            value,
            status,
        }
    });

    join_all(fetches)
        .await
        .into_iter()
        .map(|result| (result.key.clone(), result))
        .collect()
}

/// Merge fetched values into `rows`. Rows are never dropped or reordered.
pub fn merge(
    rows: Vec<Value>,
    plan: &EnrichmentPlan,
    results: &HashMap<String, EnrichmentResult>,
) -> Vec<Value> {
    rows.into_iter()
        .map(|mut row| {
            if let Some(object) = row.as_object_mut() {
                let fetched = row_key(object, &plan.key_column)
                    .and_then(|key| results.get(&key))
                    .and_then(|result| result.value.as_ref());
                apply(object, &plan.fields, fetched);
            }
            row
        })
        .collect()
}

/// Set every declared target field to null.
pub fn null_fill(rows: Vec<Value>, plan: &EnrichmentPlan) -> Vec<Value> {
    merge(rows, plan, &HashMap::new())
}

fn apply(row: &mut Map<String, Value>, fields: &[FieldMapping], fetched: Option<&Value>) {
    if fields.is_empty() {
        if let Some(Value::Object(source)) = fetched {
            for (name, value) in source {
                row.insert(name.clone(), value.clone());
            }
        }
        return;
    }

    for field in fields {
        let value = fetched
            .and_then(|doc| doc.pointer(&field.source))
            .cloned()
            .unwrap_or(Value::Null);
        row.insert(field.target.clone(), value);
    }
}

/// Enrich `rows` with values fetched from `provider`.
///
/// Per-key failures are recovered: the affected rows keep their base fields
/// and get null targets. The call fails only if the keys cannot be
/// enumerated.
pub async fn enrich(
    rows: Vec<Value>,
    provider: &dyn DataProvider,
    plan: &EnrichmentPlan,
) -> Result<(Vec<Value>, EnrichmentReport), EnrichmentError> {
    let keys = distinct_keys(&rows, &plan.key_column)?;

    let mut report = EnrichmentReport {
        distinct_keys: keys.len(),
        rows_without_key: rows
            .iter()
            .filter_map(Value::as_object)
            .filter(|row| row_key(row, &plan.key_column).is_none())
            .count(),
        ..Default::default()
    };

    let results = fan_out(provider, &keys, plan.per_call_timeout).await;
    for result in results.values() {
        report.record(result.status);
    }

    tracing::debug!(
        provider = provider.name(),
        keys = report.distinct_keys,
        succeeded = report.succeeded,
        failed = report.failed,
        timed_out = report.timed_out,
        "Enrichment complete"
    );

    Ok((merge(rows, plan, &results), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Provider with a fixed delay and outcome per key.
    #[derive(Default)]
    struct Scripted {
        outcomes: HashMap<String, (Duration, Result<Value, ProviderError>)>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn respond(mut self, key: &str, delay_ms: u64, value: Value) -> Self {
            self.outcomes
                .insert(key.into(), (Duration::from_millis(delay_ms), Ok(value)));
            self
        }

        fn fail(mut self, key: &str, delay_ms: u64) -> Self {
            self.outcomes.insert(
                key.into(),
                (
                    Duration::from_millis(delay_ms),
                    Err(ProviderError::Status {
                        key: key.into(),
                        status: 500,
                    }),
                ),
            );
            self
        }

        fn calls_for(&self, key: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|k| *k == key).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DataProvider for Scripted {
        async fn fetch(&self, key: &str) -> Result<Value, ProviderError> {
            self.calls.lock().unwrap().push(key.to_string());
            match self.outcomes.get(key) {
                Some((delay, outcome)) => {
                    tokio::time::sleep(*delay).await;
                    outcome.clone()
                }
                None => Err(ProviderError::NotFound { key: key.into() }),
            }
        }
    }

    fn row(slug: &str, tvl: i64) -> Value {
        json!({ "SLUG": slug, "TVL": tvl })
    }

    fn plan() -> EnrichmentPlan {
        EnrichmentPlan::new("SLUG")
            .with_field("/logo", "LOGO")
            .with_field("/chains/0", "CHAIN")
            .with_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_row_key_extraction() {
        let obj = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(row_key(&obj(json!({"SLUG": " gmx "})), "SLUG"), Some("gmx".into()));
        assert_eq!(row_key(&obj(json!({"SLUG": 42})), "SLUG"), Some("42".into()));
        assert_eq!(row_key(&obj(json!({"SLUG": ""})), "SLUG"), None);
        assert_eq!(row_key(&obj(json!({"SLUG": null})), "SLUG"), None);
        assert_eq!(row_key(&obj(json!({"OTHER": "x"})), "SLUG"), None);
    }

    #[test]
    fn test_distinct_keys() {
        let rows = vec![row("a", 1), row("a", 2), row("b", 3), json!({"TVL": 4})];
        assert_eq!(distinct_keys(&rows, "SLUG").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_distinct_keys_rejects_non_objects() {
        let rows = vec![row("a", 1), json!([1, 2])];
        let err = distinct_keys(&rows, "SLUG").unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_and_timeout() {
        let provider = Scripted::default()
            .respond("A", 10, json!({"logo": "a.png", "chains": ["Arbitrum"]}))
            .respond("B", 50, json!({"logo": "b.png", "chains": []}))
            .respond("C", 10_000, json!({"logo": "never"}));

        let rows = vec![row("A", 1), row("A", 2), row("B", 3), row("C", 4)];
        let (enriched, report) = enrich(rows, &provider, &plan()).await.unwrap();

        assert_eq!(enriched.len(), 4);
        assert_eq!(enriched[0]["LOGO"], json!("a.png"));
        assert_eq!(enriched[0]["CHAIN"], json!("Arbitrum"));
        assert_eq!(enriched[1]["LOGO"], json!("a.png"));
        assert_eq!(enriched[1]["TVL"], json!(2));
        assert_eq!(enriched[2]["LOGO"], json!("b.png"));
        assert_eq!(enriched[2]["CHAIN"], Value::Null);
        assert_eq!(enriched[3]["LOGO"], Value::Null);
        assert_eq!(enriched[3]["TVL"], json!(4));

        assert_eq!(provider.calls_for("A"), 1);
        assert_eq!(provider.calls_for("B"), 1);
        assert_eq!(provider.calls_for("C"), 1);
        assert_eq!(provider.total_calls(), 3);

        assert_eq!(
            report,
            EnrichmentReport {
                distinct_keys: 3,
                succeeded: 2,
                failed: 0,
                timed_out: 1,
                rows_without_key: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_run_concurrently() {
        let provider = Scripted::default()
            .respond("A", 80, json!({"logo": "a"}))
            .respond("B", 80, json!({"logo": "b"}))
            .respond("C", 80, json!({"logo": "c"}));

        let started = tokio::time::Instant::now();
        let rows = vec![row("A", 1), row("B", 2), row("C", 3)];
        let (enriched, _) = enrich(rows, &provider, &plan()).await.unwrap();

        // Sequential fetching would exceed the 100ms per-call timeout budget twice over.
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(enriched.iter().all(|r| r["LOGO"].is_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_ignores_completion_order() {
        let fast_a = Scripted::default()
            .respond("A", 1, json!({"logo": "a"}))
            .respond("B", 90, json!({"logo": "b"}));
        let fast_b = Scripted::default()
            .respond("A", 90, json!({"logo": "a"}))
            .respond("B", 1, json!({"logo": "b"}));

        let rows = vec![row("B", 1), row("A", 2), row("B", 3)];
        let (left, _) = enrich(rows.clone(), &fast_a, &plan()).await.unwrap();
        let (right, _) = enrich(rows, &fast_b, &plan()).await.unwrap();
        assert_eq!(left, right);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_missing_keys_get_null_fields() {
        let provider = Scripted::default().fail("A", 5);
        let rows = vec![row("A", 1), json!({"TVL": 2}), json!({"SLUG": "   ", "TVL": 3})];

        let (enriched, report) = enrich(rows, &provider, &plan()).await.unwrap();

        for r in &enriched {
            assert_eq!(r["LOGO"], Value::Null);
            assert_eq!(r["CHAIN"], Value::Null);
        }
        assert_eq!(report.failed, 1);
        assert_eq!(report.rows_without_key, 2);
        assert_eq!(provider.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_plan_merges_all_fields() {
        let provider = Scripted::default().respond("A", 1, json!({"logo": "a", "category": "Dexes"}));
        let plan = EnrichmentPlan::new("SLUG");

        let (enriched, _) = enrich(vec![row("A", 1), row("Z", 2)], &provider, &plan)
            .await
            .unwrap();

        assert_eq!(enriched[0], json!({"SLUG": "A", "TVL": 1, "logo": "a", "category": "Dexes"}));
        assert_eq!(enriched[1], row("Z", 2));
    }

    #[tokio::test]
    async fn test_empty_rows_make_no_calls() {
        let provider = Scripted::default();
        let (enriched, report) = enrich(vec![], &provider, &plan()).await.unwrap();
        assert!(enriched.is_empty());
        assert_eq!(report, EnrichmentReport::default());
        assert_eq!(provider.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_key_set_failure_fails_the_step() {
        let provider = Scripted::default();
        let result = enrich(vec![json!("not a row")], &provider, &plan()).await;
        assert!(matches!(result, Err(EnrichmentError::KeySet { .. })));
        assert_eq!(provider.total_calls(), 0);
    }

    #[test]
    fn test_null_fill() {
        let rows = null_fill(vec![row("A", 1)], &plan());
        assert_eq!(rows[0], json!({"SLUG": "A", "TVL": 1, "LOGO": null, "CHAIN": null}));
    }
}
