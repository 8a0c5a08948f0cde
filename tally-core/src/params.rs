//! Request parameter normalization.
//!
//! Dashboard query strings are low-trust input: every dimension is parsed
//! leniently and falls back to the route default instead of failing the
//! request. The output, [`ParameterSet`], is canonical: two requests that
//! mean the same query normalize to equal parameter sets regardless of
//! argument order, duplicate values, or surrounding whitespace.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Query argument carrying the time granularity.
pub const TIMEFRAME_ARG: &str = "timeframe";

/// Query arguments carrying the lookback window, in precedence order.
pub const LOOKBACK_ARGS: &[&str] = &["timescale", "lookback"];

/// Repeated query argument carrying excluded entity names.
pub const EXCLUDES_ARG: &str = "excludes";

/// Lookback used when the request does not carry a usable value.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 6;

/// Upper bound for the lookback window (ten years).
pub const MAX_LOOKBACK_MONTHS: u32 = 120;

/// Maximum length of a scope used as a table-name token.
const MAX_IDENTIFIER_LEN: usize = 64;

// ============================================================================
// TIMEFRAME
// ============================================================================

/// Time granularity of a dashboard query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Day,
    Week,
    Month,
}

impl Timeframe {
    /// Parse a timeframe, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Token used inside warehouse table names (e.g. `SUMMARY_WEEK_TVL`).
    pub fn table_token(&self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Week => "WEEK",
            Self::Month => "MONTH",
        }
    }

    /// Trailing window covered by one period, as an SQL interval literal.
    pub fn interval(&self) -> &'static str {
        match self {
            Self::Day => "1 day",
            Self::Week => "7 day",
            Self::Month => "1 month",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ROUTE DEFAULTS
// ============================================================================

/// How a route uses its scope filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The scope selects a table family (e.g. a chain). It is restricted to
    /// `[A-Za-z0-9_]` and lowercased.
    Identifier,
    /// The scope is bound as a query value (e.g. an entity name).
    Value,
}

/// Per-route parameter defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDefaults {
    pub timeframe: Timeframe,
    pub lookback_months: u32,
    /// Query argument the scope filter is read from.
    pub scope_arg: &'static str,
    pub scope: Option<&'static str>,
    pub scope_kind: ScopeKind,
}

impl Default for ParamDefaults {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::Month,
            lookback_months: DEFAULT_LOOKBACK_MONTHS,
            scope_arg: "chain",
            scope: Some("all"),
            scope_kind: ScopeKind::Identifier,
        }
    }
}

// ============================================================================
// RAW PARAMETERS
// ============================================================================

/// Query string pairs exactly as received, repeated keys preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParams {
    pairs: Vec<(String, String)>,
}

impl RawParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one `name=value` pair.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value for the first of `names` that is present.
    pub fn first_of(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.first(name))
    }

    /// Every value for `name`, in arrival order.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl From<Vec<(String, String)>> for RawParams {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

impl<K, V> FromIterator<(K, V)> for RawParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ============================================================================
// PARAMETER SET
// ============================================================================

/// Canonical, validated request dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ParameterSet {
    pub timeframe: Timeframe,
    pub lookback_months: u32,
    pub scope: Option<String>,
    pub exclusions: BTreeSet<String>,
}

impl ParameterSet {
    /// Exclusions in sorted order, ready for array binding.
    pub fn exclusion_list(&self) -> Vec<String> {
        self.exclusions.iter().cloned().collect()
    }

    pub fn has_exclusions(&self) -> bool {
        !self.exclusions.is_empty()
    }

    /// First day of the window: the first of `today`'s month, moved back
    /// `lookback_months` months.
    pub fn start_date(&self, today: NaiveDate) -> NaiveDate {
        let month_start = today.with_day(1).unwrap_or(today);
        month_start
            .checked_sub_months(Months::new(self.lookback_months))
            .unwrap_or(NaiveDate::MIN)
    }
}

/// Normalize raw request arguments into a [`ParameterSet`].
///
/// Never fails. Unknown arguments are ignored; unusable values fall back to
/// `defaults`.
pub fn normalize(raw: &RawParams, defaults: &ParamDefaults) -> ParameterSet {
    ParameterSet {
        timeframe: normalize_timeframe(raw.first(TIMEFRAME_ARG), defaults.timeframe),
        lookback_months: normalize_lookback(raw.first_of(LOOKBACK_ARGS), defaults.lookback_months),
        scope: normalize_scope(raw.first(defaults.scope_arg), defaults),
        exclusions: raw
            .all(EXCLUDES_ARG)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

fn normalize_timeframe(raw: Option<&str>, default: Timeframe) -> Timeframe {
    match raw {
        None => default,
        Some(value) => Timeframe::parse(value).unwrap_or_else(|| {
            tracing::debug!(value, fallback = %default, "Unrecognized timeframe, using default");
            default
        }),
    }
}

fn normalize_lookback(raw: Option<&str>, default: u32) -> u32 {
    let Some(value) = raw else {
        return default;
    };
    match value.trim().parse::<u32>() {
        Ok(0) | Err(_) => {
            tracing::debug!(value, fallback = default, "Unusable lookback, using default");
            default
        }
        Ok(months) => months.min(MAX_LOOKBACK_MONTHS),
    }
}

fn normalize_scope(raw: Option<&str>, defaults: &ParamDefaults) -> Option<String> {
    let fallback = || defaults.scope.map(|s| canonical_scope(s, defaults.scope_kind));

    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return fallback();
    };

    match defaults.scope_kind {
        ScopeKind::Value => Some(value.to_string()),
        ScopeKind::Identifier if is_identifier(value) => {
            Some(canonical_scope(value, ScopeKind::Identifier))
        }
        ScopeKind::Identifier => {
            tracing::debug!(value, "Scope is not a valid identifier, using default");
            fallback()
        }
    }
}

fn canonical_scope(value: &str, kind: ScopeKind) -> String {
    match kind {
        ScopeKind::Identifier => value.to_ascii_lowercase(),
        ScopeKind::Value => value.to_string(),
    }
}

/// True for `[A-Za-z0-9_]{1,64}`.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
