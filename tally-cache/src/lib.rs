//! Tally Cache - Request-Fingerprint Memoization
//!
//! Dashboard responses are memoized under a [`Fingerprint`] derived from the
//! route and its normalized parameters. Entries carry a TTL and expire
//! passively; there is no invalidation.
//!
//! Two stores implement [`CacheStore`]: [`MemoryStore`] (in-process, sharded
//! map) and [`LmdbStore`] (durable, memory-mapped).
//!
//! # Example
//!
//! ```ignore
//! let cache = MemoCache::new(Arc::new(MemoryStore::new()));
//! let key = build_key("/overview", &params);
//!
//! let read = cache
//!     .get_or_compute(&key, Duration::from_secs(60), || assembler.assemble(&params))
//!     .await?;
//!
//! if read.was_cache_hit() {
//!     tracing::debug!("served from cache");
//! }
//! ```

pub mod entry;
pub mod fingerprint;
pub mod lmdb_store;
pub mod memo;
pub mod memory_store;
pub mod traits;

pub use entry::{CacheEntry, CacheOutcome, EntryDecodeError, MemoRead};
pub use fingerprint::{build_key, canonical_form, normalize_route, Fingerprint, KEY_PREFIX};
pub use lmdb_store::{LmdbStore, LmdbStoreError, SweepRecord};
pub use memo::{MemoCache, DEFAULT_SWEEP_INTERVAL};
pub use memory_store::MemoryStore;
pub use traits::{CacheStats, CacheStore, StoreStats};
