//! Cache store trait and statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_core::CacheStoreError;

use crate::entry::CacheEntry;
use crate::fingerprint::Fingerprint;

/// Key/value store behind the memoization cache.
///
/// Implementations must be safe for concurrent use. Entries are addressed by
/// [`Fingerprint`] and expire passively: reads still return them and a
/// recomputation overwrites them. [`CacheStore::purge_expired`] is the only
/// way space held by expired entries is given back.
///
/// # Errors
///
/// - `get` returns [`CacheStoreError::Corrupt`] when stored bytes cannot be
///   decoded. The memoization cache treats that as a miss.
/// - `put` returns [`CacheStoreError::Full`] when the store has no room
///   left. The memoization cache purges expired entries and retries once.
/// - Any other error means the store itself is unusable and fails the
///   request.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Read the entry stored under `key`, expired or not.
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheStoreError>;

    /// Write `entry` under `key`, replacing any previous entry.
    async fn put(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheStoreError>;

    /// Delete every entry expired at `now`, along with entries that no longer
    /// decode. Returns the number of entries removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheStoreError>;

    async fn stats(&self) -> Result<StoreStats, CacheStoreError>;
}

/// Size of a store's contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of entries currently stored, expired ones included.
    pub entry_count: u64,
    /// Approximate encoded size in bytes.
    pub size_bytes: u64,
}

/// Counters kept by the memoization cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Successful writes after a miss.
    pub stores: u64,
    /// Computations that failed and left the store untouched.
    pub compute_failures: u64,
    /// Entries that could not be decoded and were recomputed.
    pub corrupt_entries: u64,
    /// Expired or undecodable entries deleted by purges.
    pub purged_entries: u64,
    pub store: StoreStats,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
