//! Memoization over a [`CacheStore`].
//!
//! [`MemoCache::get_or_compute`] is the single entry point: an unexpired
//! entry is returned without running the computation; otherwise the
//! computation runs and its result is stored with the caller's TTL.
//!
//! Concurrent misses on the same fingerprint may each compute and each
//! store. The last write wins; all writes carry equivalent payloads.
//!
//! Expired entries are purged from the store at most once per sweep
//! interval, and immediately when a write finds the store full.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tally_core::{CacheStoreError, Clock, SystemClock};

use crate::entry::{CacheEntry, MemoRead};
use crate::fingerprint::Fingerprint;
use crate::traits::{CacheStats, CacheStore};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    compute_failures: AtomicU64,
    corrupt_entries: AtomicU64,
    purged_entries: AtomicU64,
}

/// Default interval between purges of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Request-fingerprint memoization cache.
#[derive(Clone)]
pub struct MemoCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
    sweep_interval: Option<Duration>,
    /// Millis timestamp of the last purge, or of construction.
    last_sweep: Arc<AtomicI64>,
}

impl MemoCache {
    /// Create a cache over `store` using the system clock.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now().timestamp_millis();
        Self {
            store,
            clock,
            counters: Arc::new(Counters::default()),
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            last_sweep: Arc::new(AtomicI64::new(started)),
        }
    }

    /// Set how often expired entries are purged after a store. `None`
    /// leaves purging to the store-full path only.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Return the stored payload for `key`, or compute, store and return it.
    ///
    /// # Errors
    ///
    /// - The computation's error, unchanged. Nothing is stored.
    /// - A store read or write failure, converted into `E`. A corrupt entry
    ///   is not an error: it is logged and recomputed.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &Fingerprint,
        ttl: Duration,
        compute: F,
    ) -> Result<MemoRead<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: From<CacheStoreError>,
    {
        let now = self.clock.now();

        match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired_at(now) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = %key, "Cache hit");
                return Ok(MemoRead::from_cache(entry.payload, entry.created_at));
            }
            Ok(Some(entry)) => {
                tracing::debug!(
                    fingerprint = %key,
                    created_at = %entry.created_at,
                    ttl_secs = entry.ttl.as_secs(),
                    "Cache entry expired"
                );
            }
            Ok(None) => {}
            Err(CacheStoreError::Corrupt { key: stored, reason }) => {
                self.counters.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(fingerprint = %stored, reason = %reason, "Corrupt cache entry, recomputing");
            }
            Err(err) => return Err(err.into()),
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(fingerprint = %key, "Cache miss");

        let payload = match compute().await {
            Ok(payload) => payload,
            Err(err) => {
                self.counters.compute_failures.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };

        let entry = CacheEntry::new(payload, self.clock.now(), ttl);
        match self.store.put(key, &entry).await {
            Ok(()) => {}
            Err(CacheStoreError::Full { reason }) => {
                tracing::warn!(fingerprint = %key, reason = %reason, "Cache store full, purging expired entries");
                self.purge(entry.created_at).await?;
                self.store.put(key, &entry).await?;
            }
            Err(err) => return Err(err.into()),
        }
        self.counters.stores.fetch_add(1, Ordering::Relaxed);
        self.maybe_sweep(entry.created_at).await;

        Ok(MemoRead::from_compute(entry.payload, entry.created_at))
    }

    async fn purge(&self, now: DateTime<Utc>) -> Result<u64, CacheStoreError> {
        self.last_sweep.store(now.timestamp_millis(), Ordering::Relaxed);
        let removed = self.store.purge_expired(now).await?;
        self.counters.purged_entries.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(store = self.store.name(), removed, "Purged expired cache entries");
        Ok(removed)
    }

    /// Purge if the sweep interval has elapsed. Failures are logged only;
    /// the entry that triggered the sweep is already stored.
    async fn maybe_sweep(&self, now: DateTime<Utc>) {
        let Some(interval) = self.sweep_interval else {
            return;
        };
        let last = self.last_sweep.load(Ordering::Relaxed);
        let due = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        if now.timestamp_millis().saturating_sub(last) < due {
            return;
        }
        // One caller wins the sweep; concurrent stores skip it.
        if self
            .last_sweep
            .compare_exchange(last, now.timestamp_millis(), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        if let Err(err) = self.purge(now).await {
            tracing::warn!(error = %err, "Periodic cache purge failed");
        }
    }

    /// Snapshot of counters plus the store's size.
    pub async fn stats(&self) -> Result<CacheStats, CacheStoreError> {
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            compute_failures: self.counters.compute_failures.load(Ordering::Relaxed),
            corrupt_entries: self.counters.corrupt_entries.load(Ordering::Relaxed),
            purged_entries: self.counters.purged_entries.load(Ordering::Relaxed),
            store: self.store.stats().await?,
        })
    }
}

impl std::fmt::Debug for MemoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("store", &self.store.name())
            .field("counters", &self.counters)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::build_key;
    use crate::memory_store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tally_core::{normalize, ManualClock, ParamDefaults, RawParams, TallyError, WarehouseError};

    use crate::traits::StoreStats;

    fn key() -> Fingerprint {
        build_key("/overview", &normalize(&RawParams::new(), &ParamDefaults::default()))
    }

    fn setup() -> (MemoCache, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ));
        let cache = MemoCache::with_clock(store.clone(), clock.clone());
        (cache, store, clock)
    }

    async fn counted(
        cache: &MemoCache,
        calls: &AtomicUsize,
        ttl: Duration,
    ) -> Result<MemoRead<Value>, TallyError> {
        cache
            .get_or_compute(&key(), ttl, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, TallyError>(json!({ "call": n }))
            })
            .await
    }

    #[tokio::test]
    async fn test_hit_does_not_compute() {
        let (cache, _store, _clock) = setup();
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        let first = counted(&cache, &calls, ttl).await.unwrap();
        let second = counted(&cache, &calls, ttl).await.unwrap();

        assert!(!first.was_cache_hit());
        assert!(second.was_cache_hit());
        assert_eq!(first.value(), second.value());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await.unwrap();
        assert_eq!((stats.hits, stats.misses, stats.stores), (1, 1, 1));
        assert_eq!(stats.store.entry_count, 1);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (cache, _store, clock) = setup();
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        counted(&cache, &calls, ttl).await.unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert!(counted(&cache, &calls, ttl).await.unwrap().was_cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(2));
        let read = counted(&cache, &calls, ttl).await.unwrap();
        assert!(!read.was_cache_hit());
        assert_eq!(read.value(), &json!({"call": 2}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_compute_stores_nothing() {
        let (cache, store, _clock) = setup();

        let result: Result<MemoRead<Value>, TallyError> = cache
            .get_or_compute(&key(), Duration::from_secs(60), || async {
                Err(WarehouseError::Connection {
                    reason: "refused".into(),
                }
                .into())
            })
            .await;

        assert!(matches!(result, Err(TallyError::Warehouse(_))));
        assert!(store.is_empty());
        assert_eq!(cache.stats().await.unwrap().compute_failures, 1);

        // The next request computes again.
        let calls = AtomicUsize::new(0);
        let read = counted(&cache, &calls, Duration::from_secs(60)).await.unwrap();
        assert!(!read.was_cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_recomputed_and_overwritten() {
        let (cache, store, _clock) = setup();
        store.insert_raw(&key(), b"garbage".to_vec());

        let calls = AtomicUsize::new(0);
        let read = counted(&cache, &calls, Duration::from_secs(60)).await.unwrap();
        assert!(!read.was_cache_hit());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(counted(&cache, &calls, Duration::from_secs(60)).await.unwrap().was_cache_hit());
        assert_eq!(cache.stats().await.unwrap().corrupt_entries, 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &Fingerprint) -> Result<Option<CacheEntry>, CacheStoreError> {
            Err(CacheStoreError::Unavailable {
                reason: "disk gone".into(),
            })
        }

        async fn put(&self, _key: &Fingerprint, _entry: &CacheEntry) -> Result<(), CacheStoreError> {
            Err(CacheStoreError::Unavailable {
                reason: "disk gone".into(),
            })
        }

        async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, CacheStoreError> {
            Ok(0)
        }

        async fn stats(&self) -> Result<StoreStats, CacheStoreError> {
            Ok(StoreStats::default())
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let cache = MemoCache::new(Arc::new(BrokenStore));
        let calls = AtomicUsize::new(0);

        let result = counted(&cache, &calls, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(TallyError::Cache(CacheStoreError::Unavailable { .. }))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn keyed(n: usize) -> Fingerprint {
        let mut raw = RawParams::new();
        raw.push("excludes", format!("protocol{}", n));
        build_key("/overview", &normalize(&raw, &ParamDefaults::default()))
    }

    #[tokio::test]
    async fn test_expired_entries_do_not_exhaust_lmdb() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(crate::lmdb_store::LmdbStore::open(dir.path(), 1).unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        ));
        let cache = MemoCache::with_clock(store.clone(), clock.clone()).with_sweep_interval(None);
        let blob = "x".repeat(20 * 1024);

        for n in 0..150 {
            clock.advance(chrono::Duration::seconds(120));
            let payload = json!({ "n": n, "blob": blob });
            let read = cache
                .get_or_compute(&keyed(n), Duration::from_secs(60), || async move {
                    Ok::<_, TallyError>(payload)
                })
                .await;
            assert!(read.is_ok(), "request {} failed: {:?}", n, read.err());
        }

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.stores, 150);
        assert!(stats.purged_entries > 0);
        assert!(stats.store.entry_count < 150);
        assert!(store.last_sweep().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_periodic_sweep_removes_expired_entries() {
        let (cache, store, clock) = setup();
        let cache = cache.with_sweep_interval(Some(Duration::from_secs(300)));
        let ttl = Duration::from_secs(60);

        for n in 0..3 {
            cache
                .get_or_compute(&keyed(n), ttl, || async { Ok::<_, TallyError>(json!(n)) })
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 3);

        clock.advance(chrono::Duration::seconds(301));
        cache
            .get_or_compute(&keyed(99), ttl, || async { Ok::<_, TallyError>(json!(99)) })
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains(&keyed(99)));
        assert_eq!(cache.stats().await.unwrap().purged_entries, 3);
    }
}
