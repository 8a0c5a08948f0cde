//! Dashboard pipeline.
//!
//! The caller-facing read contract: resolve the route, normalize the raw
//! arguments, fingerprint the request, and serve it from the memoization
//! cache or the response assembler.

use std::sync::Arc;

use serde_json::Value;
use tally_cache::{build_key, MemoCache, MemoRead};
use tally_core::{normalize, RawParams, TallyError, TallyResult};

use crate::assembler::ResponseAssembler;
use crate::catalog::RouteCatalog;
use crate::telemetry::metrics;

/// Memoized dashboard reads over a route catalog.
#[derive(Clone)]
pub struct DashboardPipeline {
    catalog: Arc<RouteCatalog>,
    cache: MemoCache,
    assembler: ResponseAssembler,
}

impl DashboardPipeline {
    pub fn new(catalog: RouteCatalog, cache: MemoCache, assembler: ResponseAssembler) -> Self {
        Self {
            catalog: Arc::new(catalog),
            cache,
            assembler,
        }
    }

    pub fn catalog(&self) -> &RouteCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &MemoCache {
        &self.cache
    }

    pub fn assembler(&self) -> &ResponseAssembler {
        &self.assembler
    }

    /// Payload of `route` for `raw`, from cache when an unexpired entry
    /// exists.
    ///
    /// # Errors
    ///
    /// - [`TallyError::UnknownRoute`] when `route` is not in the catalog.
    /// - Any assembly or cache store failure. Failed computations are not
    ///   cached.
    pub async fn get_or_compute(&self, route: &str, raw: &RawParams) -> TallyResult<MemoRead<Value>> {
        let spec = self.catalog.get(route).ok_or_else(|| TallyError::UnknownRoute {
            route: route.to_string(),
        })?;

        let params = normalize(raw, &spec.defaults);
        let key = build_key(spec.path, &params);

        let read = self
            .cache
            .get_or_compute(&key, spec.ttl, || self.assembler.assemble(spec, &params))
            .await?;

        if let Some(metrics) = metrics() {
            metrics.record_cache_lookup(spec.path, read.outcome().as_str());
        }
        tracing::debug!(
            route = spec.path,
            fingerprint = %key,
            outcome = read.outcome().as_str(),
            "Dashboard read served"
        );

        Ok(read)
    }
}
