//! LMDB-backed durable cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB): a memory-mapped key/value
//! store whose entries survive process restarts. Keys are fingerprint bytes,
//! values are encoded [`CacheEntry`] bytes.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. `get` and `stats` use read transactions,
//! `put` uses a write transaction; LMDB serializes writers internally.
//!
//! # Reclaiming space
//!
//! The memory map has a fixed size. Expired entries keep their pages until
//! [`CacheStore::purge_expired`] deletes them; a write that finds the map
//! full fails with [`CacheStoreError::Full`]. Pages freed by a purge are only
//! reusable by a write transaction two commits later, so every purge that
//! removes something is followed by a separate commit recording the sweep.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions, MdbError};
use tally_core::CacheStoreError;

use crate::entry::CacheEntry;
use crate::fingerprint::Fingerprint;
use crate::traits::{CacheStore, StoreStats};

/// Error type for LMDB store setup and transactions.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment at {path}: {reason}")]
    EnvOpen { path: PathBuf, reason: String },

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("MDB_MAP_FULL: memory map of {map_size} bytes is full")]
    MapFull { map_size: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for CacheStoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Transaction(reason) => CacheStoreError::Transaction { reason },
            full @ LmdbStoreError::MapFull { .. } => CacheStoreError::Full {
                reason: full.to_string(),
            },
            other => CacheStoreError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// Key of the sweep record in the `sweeps` database.
const LAST_SWEEP: &str = "last_sweep";

/// Outcome of the most recent purge that removed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepRecord {
    pub swept_at: DateTime<Utc>,
    pub removed: u64,
}

impl SweepRecord {
    fn encode(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.swept_at.timestamp_millis().to_le_bytes());
        bytes[8..].copy_from_slice(&self.removed.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let millis = i64::from_le_bytes(bytes.get(..8)?.try_into().ok()?);
        let removed = u64::from_le_bytes(bytes.get(8..16)?.try_into().ok()?);
        Some(Self {
            swept_at: Utc.timestamp_millis_opt(millis).single()?,
            removed,
        })
    }
}

/// Durable cache store: entries and sweep bookkeeping in two named LMDB
/// databases, so the unnamed root holds nothing but their handles.
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    sweeps: Database<Str, Bytes>,
    path: PathBuf,
    map_size: usize,
}

fn txn_error(map_size: usize) -> impl Fn(heed::Error) -> LmdbStoreError {
    move |e| match e {
        heed::Error::Mdb(MdbError::MapFull) => LmdbStoreError::MapFull { map_size },
        other => LmdbStoreError::Transaction(other.to_string()),
    }
}

impl LmdbStore {
    /// Open (or create) the store under `path`.
    ///
    /// `max_size_mb` bounds the memory map; writes beyond it fail with
    /// [`LmdbStoreError::MapFull`].
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let path = path.as_ref().to_path_buf();
        let map_size = max_size_mb * 1024 * 1024;
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the backing files are not modified by anything else while mapped.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .open(&path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("entries"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        let sweeps: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("sweeps"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::info!(path = %path.display(), max_size_mb, "Opened LMDB cache store");

        Ok(Self {
            env,
            db,
            sweeps,
            path,
            map_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_bytes(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let bytes = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(bytes.map(|b| b.to_vec()))
    }

    fn write_bytes(&self, key: &Fingerprint, bytes: &[u8]) -> Result<(), LmdbStoreError> {
        let err = txn_error(self.map_size);
        let mut wtxn = self.env.write_txn().map_err(&err)?;

        self.db.put(&mut wtxn, key.as_bytes(), bytes).map_err(&err)?;

        wtxn.commit().map_err(&err)
    }

    /// Delete expired and undecodable entries, then record the sweep.
    fn purge_bytes(&self, now: DateTime<Utc>) -> Result<u64, LmdbStoreError> {
        let err = txn_error(self.map_size);
        let mut wtxn = self.env.write_txn().map_err(&err)?;

        let mut stale: Vec<Vec<u8>> = Vec::new();
        for item in self.db.iter(&wtxn).map_err(&err)? {
            let (key, bytes) = item.map_err(&err)?;
            let expired = match CacheEntry::decode(bytes) {
                Ok(entry) => entry.is_expired_at(now),
                Err(_) => true,
            };
            if expired {
                stale.push(key.to_vec());
            }
        }

        for key in &stale {
            self.db.delete(&mut wtxn, key.as_slice()).map_err(&err)?;
        }
        wtxn.commit().map_err(&err)?;

        let removed = stale.len() as u64;
        if removed > 0 {
            self.record_sweep(SweepRecord {
                swept_at: now,
                removed,
            })?;
        }
        Ok(removed)
    }

    fn record_sweep(&self, record: SweepRecord) -> Result<(), LmdbStoreError> {
        let err = txn_error(self.map_size);
        let mut wtxn = self.env.write_txn().map_err(&err)?;
        self.sweeps
            .put(&mut wtxn, LAST_SWEEP, &record.encode())
            .map_err(&err)?;
        wtxn.commit().map_err(&err)
    }

    /// The most recent sweep that removed entries, if any.
    pub fn last_sweep(&self) -> Result<Option<SweepRecord>, LmdbStoreError> {
        let err = txn_error(self.map_size);
        let rtxn = self.env.read_txn().map_err(&err)?;
        let bytes = self.sweeps.get(&rtxn, LAST_SWEEP).map_err(&err)?;
        Ok(bytes.and_then(SweepRecord::decode))
    }
}

#[async_trait]
impl CacheStore for LmdbStore {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheStoreError> {
        let Some(bytes) = self.read_bytes(key)? else {
            return Ok(None);
        };

        CacheEntry::decode(&bytes)
            .map(Some)
            .map_err(|e| CacheStoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn put(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheStoreError> {
        let bytes = entry.encode().map_err(|e| CacheStoreError::Transaction {
            reason: format!("encode failed: {}", e),
        })?;
        self.write_bytes(key, &bytes)?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheStoreError> {
        let removed = self.purge_bytes(now)?;
        tracing::debug!(path = %self.path.display(), removed, "Purged expired LMDB entries");
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats, CacheStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let entry_count = self
            .db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let size_bytes = self
            .env
            .real_disk_size()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(StoreStats {
            entry_count,
            size_bytes,
        })
    }
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore").field("path", &self.path).finish()
    }
}
