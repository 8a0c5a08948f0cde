//! End-to-end memoization through the dashboard pipeline.

use std::sync::Arc;

use proptest::prelude::*;
use tally_api::{DashboardPipeline, ResponseAssembler, RouteCatalog};
use tally_cache::{build_key, CacheOutcome, MemoCache, MemoryStore};
use tally_core::{normalize, ManualClock, TallyError, WarehouseError};
use tally_test_utils::fixtures::{fixed_clock, raw};
use tally_test_utils::generators::{arb_exclusions, arb_lookback_arg, arb_timeframe_arg};
use tally_test_utils::CountingExecutor;

struct Harness {
    executor: Arc<CountingExecutor>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    pipeline: DashboardPipeline,
}

fn harness(executor: CountingExecutor) -> Harness {
    let executor = Arc::new(executor);
    let store = Arc::new(MemoryStore::new());
    let clock = fixed_clock();
    let pipeline = DashboardPipeline::new(
        RouteCatalog::dashboards(),
        MemoCache::with_clock(store.clone(), clock.clone()),
        ResponseAssembler::new(executor.clone()).with_clock(clock.clone()),
    );
    Harness {
        executor,
        store,
        clock,
        pipeline,
    }
}

#[tokio::test]
async fn reordered_arguments_share_one_computation() {
    let h = harness(CountingExecutor::new());

    let first = h
        .pipeline
        .get_or_compute("/overview", &raw(&[("timeframe", "week"), ("excludes", "foo")]))
        .await
        .unwrap();
    let calls_after_miss = h.executor.calls();

    let second = h
        .pipeline
        .get_or_compute("/overview", &raw(&[("excludes", "foo"), ("timeframe", "week")]))
        .await
        .unwrap();

    assert_eq!(first.outcome(), CacheOutcome::Miss);
    assert_eq!(second.outcome(), CacheOutcome::Hit);
    assert_eq!(h.executor.calls(), calls_after_miss);
    assert_eq!(h.store.len(), 1);

    let overview = h.pipeline.catalog().get("/overview").unwrap();
    let params = normalize(&raw(&[("timeframe", "week"), ("excludes", "foo")]), &overview.defaults);
    assert_eq!(calls_after_miss, overview.queries.select(&params).len());
}

#[tokio::test]
async fn single_query_route_executes_once_across_miss_and_hit() {
    let h = harness(CountingExecutor::new());

    let miss = h
        .pipeline
        .get_or_compute("/leaderboard", &raw(&[("timeframe", "week"), ("excludes", "foo")]))
        .await
        .unwrap();
    let hit = h
        .pipeline
        .get_or_compute("/leaderboard", &raw(&[("excludes", " foo "), ("timeframe", "week")]))
        .await
        .unwrap();

    assert!(!miss.was_cache_hit());
    assert!(hit.was_cache_hit());
    assert_eq!(h.executor.calls(), 1);
}

#[tokio::test]
async fn failed_computation_is_not_cached() {
    let h = harness(CountingExecutor::new());
    h.executor.set_unavailable(true);

    let err = h.pipeline.get_or_compute("/grantee", &raw(&[])).await.unwrap_err();
    assert!(matches!(err, TallyError::Warehouse(WarehouseError::Connection { .. })));
    assert!(h.store.is_empty());

    h.executor.set_unavailable(false);
    let read = h.pipeline.get_or_compute("/grantee", &raw(&[])).await.unwrap();
    assert_eq!(read.outcome(), CacheOutcome::Miss);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn entries_expire_after_route_ttl() {
    let h = harness(CountingExecutor::new());
    let args = raw(&[("chain", "one")]);

    h.pipeline.get_or_compute("/leaderboard", &args).await.unwrap();

    h.clock.advance(chrono::Duration::seconds(59));
    let cached = h.pipeline.get_or_compute("/leaderboard", &args).await.unwrap();
    assert!(cached.was_cache_hit());
    assert_eq!(h.executor.calls(), 1);

    h.clock.advance(chrono::Duration::seconds(2));
    let refreshed = h.pipeline.get_or_compute("/leaderboard", &args).await.unwrap();
    assert!(!refreshed.was_cache_hit());
    assert_eq!(h.executor.calls(), 2);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn routes_never_share_entries() {
    let h = harness(CountingExecutor::new());

    h.pipeline.get_or_compute("/overview", &raw(&[])).await.unwrap();
    let leaderboard = h.pipeline.get_or_compute("/leaderboard", &raw(&[])).await.unwrap();

    assert!(!leaderboard.was_cache_hit());
    assert_eq!(h.store.len(), 2);
}

proptest! {
    #[test]
    fn argument_order_never_changes_the_fingerprint(
        exclusions in arb_exclusions(),
        timeframe in arb_timeframe_arg(),
        lookback in arb_lookback_arg(),
    ) {
        let overview = RouteCatalog::dashboards().get("/overview").cloned().unwrap();

        let mut forward: Vec<(&str, &str)> = vec![("timeframe", timeframe.as_str()), ("timescale", lookback.as_str())];
        forward.extend(exclusions.iter().map(|e| ("excludes", e.as_str())));
        let mut backward = forward.clone();
        backward.reverse();

        let a = build_key(overview.path, &normalize(&raw(&forward), &overview.defaults));
        let b = build_key(overview.path, &normalize(&raw(&backward), &overview.defaults));
        prop_assert_eq!(a, b);
    }
}
