//! Response assembly.
//!
//! Runs a route's queries one after another, shapes their rows into a single
//! JSON object keyed by output name, then enriches and timestamps it when
//! the route asks for that.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tally_core::{Clock, ParameterSet, QueryExecutor, Row, SystemClock, TallyResult};
use tally_enrich::{enrich, null_fill, DataProvider, EnrichmentReport, FetchStatus, DEFAULT_FETCH_TIMEOUT};

use crate::catalog::{Gate, Projection, QuerySpec, RouteSpec};
use crate::telemetry::metrics;
use crate::template::RenderContext;

/// Payload key of the assembly timestamp.
pub const TIME_FIELD: &str = "time";

/// `dd/mm/yy HH:MM`
pub const TIME_FORMAT: &str = "%d/%m/%y %H:%M";

/// Builds route payloads from warehouse rows and optional enrichment.
#[derive(Clone)]
pub struct ResponseAssembler {
    executor: Arc<dyn QueryExecutor>,
    provider: Option<Arc<dyn DataProvider>>,
    clock: Arc<dyn Clock>,
    enrich_timeout: Duration,
}

impl ResponseAssembler {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            provider: None,
            clock: Arc::new(SystemClock),
            enrich_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Enrich with `provider`, bounding each fetch by `per_call_timeout`.
    pub fn with_provider(mut self, provider: Arc<dyn DataProvider>, per_call_timeout: Duration) -> Self {
        self.provider = Some(provider);
        self.enrich_timeout = per_call_timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Build the payload of `route` for `params`.
    ///
    /// # Errors
    ///
    /// The first rendering or warehouse failure. Enrichment failures per key
    /// are not errors.
    pub async fn assemble(&self, route: &RouteSpec, params: &ParameterSet) -> TallyResult<Value> {
        let now = self.clock.now();
        let ctx = RenderContext {
            params,
            scope_kind: route.scope_kind(),
            today: now.date_naive(),
        };

        let mut payload = Map::new();
        let mut first_rows: HashMap<&str, Option<Row>> = HashMap::new();

        for spec in route.queries.select(params) {
            if let Some(gate) = &spec.gate {
                if !gate_open(gate, &first_rows) {
                    tracing::debug!(
                        route = route.path,
                        query = spec.name,
                        gate = gate.query,
                        "Gate closed, skipping query"
                    );
                    for key in output_keys(spec) {
                        payload.insert(key.to_string(), Value::from(0));
                    }
                    continue;
                }
            }

            let rendered = spec.template.render(spec.name, &ctx)?;
            let rows = self.executor.execute(&rendered).await?;
            first_rows.insert(spec.name, rows.first().cloned());
            project(spec, rows, &mut payload);
        }

        if let Some(enrichment) = &route.enrichment {
            let plan = enrichment.plan(self.enrich_timeout);
            match payload.get_mut(enrichment.query) {
                Some(Value::Array(rows)) => {
                    let rows = std::mem::take(rows);
                    let rows = match &self.provider {
                        Some(provider) => {
                            let (rows, report) = enrich(rows, provider.as_ref(), &plan).await?;
                            record_enrichment(route.path, &report);
                            rows
                        }
                        None => null_fill(rows, &plan),
                    };
                    payload.insert(enrichment.query.to_string(), Value::Array(rows));
                }
                // A closed gate leaves a literal in place of the rows.
                Some(other) => tracing::debug!(
                    route = route.path,
                    query = enrichment.query,
                    value = %other,
                    "Enriched query produced no rows, skipping enrichment"
                ),
                None => {}
            }
        }

        if route.timestamp {
            payload.insert(
                TIME_FIELD.to_string(),
                Value::String(now.format(TIME_FORMAT).to_string()),
            );
        }

        Ok(Value::Object(payload))
    }
}

/// Open when the gating query's first row holds a non-zero `column`.
fn gate_open(gate: &Gate, first_rows: &HashMap<&str, Option<Row>>) -> bool {
    let value = first_rows
        .get(gate.query)
        .and_then(Option::as_ref)
        .and_then(|row| row.get(gate.column));

    match value {
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().parse::<f64>().is_ok_and(|n| n != 0.0),
        _ => false,
    }
}

fn output_keys(spec: &QuerySpec) -> Vec<&'static str> {
    match spec.projection {
        Projection::Rows => vec![spec.name],
        Projection::Stats(stats) => stats.iter().map(|(key, _)| *key).collect(),
        Projection::Split(splits) => splits.iter().map(|(key, _)| *key).collect(),
    }
}

fn project(spec: &QuerySpec, rows: Vec<Row>, payload: &mut Map<String, Value>) {
    match spec.projection {
        Projection::Rows => {
            payload.insert(
                spec.name.to_string(),
                Value::Array(rows.into_iter().map(Value::Object).collect()),
            );
        }
        Projection::Stats(stats) => {
            let first = rows.first();
            for (key, column) in stats {
                let value = first
                    .and_then(|row| row.get(*column))
                    .cloned()
                    .unwrap_or(Value::Null);
                let mut stat = Map::new();
                stat.insert(column.to_string(), value);
                payload.insert(key.to_string(), Value::Array(vec![Value::Object(stat)]));
            }
        }
        Projection::Split(splits) => {
            for (key, dropped) in splits {
                let shaped = rows
                    .iter()
                    .map(|row| {
                        let mut row = row.clone();
                        for column in *dropped {
                            row.remove(*column);
                        }
                        Value::Object(row)
                    })
                    .collect();
                payload.insert(key.to_string(), Value::Array(shaped));
            }
        }
    }
}

fn record_enrichment(route: &str, report: &EnrichmentReport) {
    if let Some(metrics) = metrics() {
        metrics.record_enrichment(route, FetchStatus::Success.as_str(), report.succeeded);
        metrics.record_enrichment(route, FetchStatus::Failure.as_str(), report.failed);
        metrics.record_enrichment(route, FetchStatus::Timeout.as_str(), report.timed_out);
    }
}
