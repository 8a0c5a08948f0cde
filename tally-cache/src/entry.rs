//! Stored cache entries and memoized reads.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Header size: created_at (8 bytes) + ttl (8 bytes).
const HEADER_LEN: usize = 16;

/// Error decoding stored entry bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryDecodeError {
    #[error("entry is {len} bytes, shorter than the {HEADER_LEN}-byte header")]
    Truncated { len: usize },

    #[error("created_at {millis}ms is out of range")]
    Timestamp { millis: i64 },

    #[error("payload is not valid JSON: {0}")]
    Payload(String),
}

/// A memoized payload together with its creation time and TTL.
///
/// Entries are written once after a successful computation and expire
/// passively; a later recomputation overwrites them.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(payload: Value, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            payload,
            created_at,
            ttl,
        }
    }

    /// True once the entry is strictly older than its TTL.
    ///
    /// An entry aged exactly `ttl` is still served.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match age.to_std() {
            Ok(age) => age > self.ttl,
            // Created in the future relative to `now` (clock skew): not expired.
            Err(_) => false,
        }
    }

    /// Encode as `[created_at millis: i64 LE][ttl millis: u64 LE][JSON]`.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let json = serde_json::to_vec(&self.payload)?;
        let ttl_millis = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);

        let mut bytes = Vec::with_capacity(HEADER_LEN + json.len());
        bytes.extend_from_slice(&self.created_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&ttl_millis.to_le_bytes());
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EntryDecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(EntryDecodeError::Truncated { len: bytes.len() });
        }

        let mut created = [0u8; 8];
        created.copy_from_slice(&bytes[0..8]);
        let millis = i64::from_le_bytes(created);

        let mut ttl = [0u8; 8];
        ttl.copy_from_slice(&bytes[8..16]);
        let ttl = Duration::from_millis(u64::from_le_bytes(ttl));

        let created_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or(EntryDecodeError::Timestamp { millis })?;

        let payload = serde_json::from_slice(&bytes[HEADER_LEN..])
            .map_err(|e| EntryDecodeError::Payload(e.to_string()))?;

        Ok(Self {
            payload,
            created_at,
            ttl,
        })
    }

    /// Encoded size in bytes, for store statistics.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.to_string().len()
    }
}

/// Whether a memoized read was served from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    /// Header value (`hit` / `miss`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

/// Result of a memoized read: the payload plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoRead<T> {
    value: T,
    outcome: CacheOutcome,
    computed_at: DateTime<Utc>,
}

impl<T> MemoRead<T> {
    /// A read served from a stored entry.
    pub fn from_cache(value: T, computed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            outcome: CacheOutcome::Hit,
            computed_at,
        }
    }

    /// A read that ran the computation.
    pub fn from_compute(value: T, computed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            outcome: CacheOutcome::Miss,
            computed_at,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn outcome(&self) -> CacheOutcome {
        self.outcome
    }

    pub fn was_cache_hit(&self) -> bool {
        self.outcome == CacheOutcome::Hit
    }

    /// When the payload was computed (for hits, the entry's creation time).
    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    pub fn map<U, F>(self, f: F) -> MemoRead<U>
    where
        F: FnOnce(T) -> U,
    {
        MemoRead {
            value: f(self.value),
            outcome: self.outcome,
            computed_at: self.computed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new(json!({}), t0(), Duration::from_secs(60));
        assert!(!entry.is_expired_at(t0() + chrono::Duration::seconds(59)));
        assert!(!entry.is_expired_at(t0() + chrono::Duration::seconds(60)));
        assert!(entry.is_expired_at(t0() + chrono::Duration::milliseconds(60_001)));
        assert!(entry.is_expired_at(t0() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_entry_from_the_future_is_not_expired() {
        let entry = CacheEntry::new(json!(1), t0(), Duration::from_secs(1));
        assert!(!entry.is_expired_at(t0() - chrono::Duration::hours(1)));
    }

    #[test]
    fn test_encoded_layout() {
        let entry = CacheEntry::new(json!({"tvl": [1, 2]}), t0(), Duration::from_secs(60));
        let bytes = entry.encode().unwrap();

        assert_eq!(&bytes[0..8], &t0().timestamp_millis().to_le_bytes());
        assert_eq!(&bytes[8..16], &60_000u64.to_le_bytes());
        assert_eq!(&bytes[16..], br#"{"tvl":[1,2]}"#);
        assert_eq!(bytes.len(), entry.encoded_len());

        assert_eq!(CacheEntry::decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            CacheEntry::decode(&[1, 2, 3]),
            Err(EntryDecodeError::Truncated { len: 3 })
        );

        let mut bytes = CacheEntry::new(json!(null), t0(), Duration::from_secs(1))
            .encode()
            .unwrap();
        bytes.truncate(HEADER_LEN);
        bytes.extend_from_slice(b"{broken");
        assert!(matches!(
            CacheEntry::decode(&bytes),
            Err(EntryDecodeError::Payload(_))
        ));
    }

    #[test]
    fn test_memo_read_accessors() {
        let hit = MemoRead::from_cache(json!(1), t0());
        assert!(hit.was_cache_hit());
        assert_eq!(hit.outcome().as_str(), "hit");
        assert_eq!(hit.computed_at(), t0());

        let miss = MemoRead::from_compute(2, t0()).map(|v| v * 10);
        assert!(!miss.was_cache_hit());
        assert_eq!(miss.outcome().as_str(), "miss");
        assert_eq!(*miss.value(), 20);
        assert_eq!(miss.into_value(), 20);
    }
}
