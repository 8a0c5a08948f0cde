//! In-process cache store backed by a sharded concurrent map.
//!
//! Entries are kept in their encoded form so this store behaves exactly like
//! the durable one: a write is a byte copy, a read is a decode. Contents are
//! lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tally_core::CacheStoreError;

use crate::entry::CacheEntry;
use crate::fingerprint::Fingerprint;
use crate::traits::{CacheStore, StoreStats};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<Fingerprint, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `key` without encoding.
    pub fn insert_raw(&self, key: &Fingerprint, bytes: Vec<u8>) {
        self.entries.insert(key.clone(), bytes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>, CacheStoreError> {
        // Decode outside the shard lock.
        let bytes = match self.entries.get(key) {
            Some(bytes) => bytes.value().clone(),
            None => return Ok(None),
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
        self.entries.insert(key.clone(), bytes);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheStoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, bytes| match CacheEntry::decode(bytes) {
            Ok(entry) => !entry.is_expired_at(now),
            Err(_) => false,
        });
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn stats(&self) -> Result<StoreStats, CacheStoreError> {
        let size_bytes = self
            .entries
            .iter()
            .map(|entry| entry.value().len() as u64)
            .sum();
        Ok(StoreStats {
            entry_count: self.entries.len() as u64,
            size_bytes,
        })
    }
}
