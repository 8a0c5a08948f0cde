//! Request fingerprints.
//!
//! A [`Fingerprint`] identifies one logical dashboard query: the route plus
//! its canonical [`ParameterSet`]. Requests that differ only in argument
//! order, duplicated exclusions, or whitespace share a fingerprint. The only
//! way to build one is [`build_key`], so every cache entry is addressed by a
//! normalized request.

use std::fmt;

use sha2::{Digest, Sha256};
use tally_core::ParameterSet;

/// Version prefix of the rendered key. Bump when the canonical form changes.
pub const KEY_PREFIX: &str = "tally:v1:";

/// Deterministic identity of a dashboard request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    inner: String,
}

impl Fingerprint {
    /// Key bytes as stored in the cache.
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Derive the fingerprint of `route` called with `params`.
pub fn build_key(route: &str, params: &ParameterSet) -> Fingerprint {
    let digest = Sha256::digest(canonical_form(route, params));
    Fingerprint {
        inner: format!("{}{}", KEY_PREFIX, hex::encode(digest)),
    }
}

/// Normalize a route path: leading `/` ensured, trailing `/` removed.
pub fn normalize_route(route: &str) -> String {
    let trimmed = route.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Byte string hashed into the fingerprint.
///
/// Every field is written as `[len: u64 LE][bytes]`, so field boundaries are
/// unambiguous and no two parameter sets encode to the same bytes.
pub fn canonical_form(route: &str, params: &ParameterSet) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);

    write_field(&mut out, normalize_route(route).as_bytes());
    write_field(&mut out, params.timeframe.as_str().as_bytes());
    write_field(&mut out, params.lookback_months.to_string().as_bytes());

    match &params.scope {
        Some(scope) => {
            write_field(&mut out, b"1");
            write_field(&mut out, scope.as_bytes());
        }
        None => write_field(&mut out, b"0"),
    }

    // BTreeSet iterates in sorted order.
    write_field(&mut out, params.exclusions.len().to_string().as_bytes());
    for exclusion in &params.exclusions {
        write_field(&mut out, exclusion.as_bytes());
    }

    out
}

fn write_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}
