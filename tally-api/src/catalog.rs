//! Route catalog.
//!
//! Every dashboard endpoint is configuration data: its TTL, parameter
//! defaults, query templates, and whether it enriches or timestamps its
//! payload. One pipeline serves all of them.

use std::collections::HashMap;
use std::time::Duration;

use tally_cache::normalize_route;
use tally_core::{ParamDefaults, ParameterSet, ScopeKind, Timeframe, DEFAULT_LOOKBACK_MONTHS};
use tally_enrich::{EnrichmentPlan, FieldMapping};

use crate::template::{BindParam, QueryTemplate};

/// TTL of the overview and grantee dashboards.
pub const DASHBOARD_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// TTL of the leaderboard.
pub const LEADERBOARD_TTL: Duration = Duration::from_secs(60);

// ============================================================================
// ROUTE MODEL
// ============================================================================

/// How a query's rows land in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// The row array under the query's name.
    Rows,
    /// `(output key, column)` pairs. Each output is a one-element array
    /// `[{column: value}]` read from the first row.
    Stats(&'static [(&'static str, &'static str)]),
    /// `(output key, dropped columns)` pairs. Each output is the row array
    /// with the listed columns removed.
    Split(&'static [(&'static str, &'static [&'static str])]),
}

/// Skip a query unless an earlier query's first row has a non-zero `column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    /// Name of the earlier query.
    pub query: &'static str,
    pub column: &'static str,
}

/// One warehouse query of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub name: &'static str,
    pub template: QueryTemplate,
    pub projection: Projection,
    /// When closed, the output is the literal `0`.
    pub gate: Option<Gate>,
}

impl QuerySpec {
    pub const fn rows(name: &'static str, template: QueryTemplate) -> Self {
        Self {
            name,
            template,
            projection: Projection::Rows,
            gate: None,
        }
    }

    pub const fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub const fn gated_on(mut self, query: &'static str, column: &'static str) -> Self {
        self.gate = Some(Gate { query, column });
        self
    }
}

/// Queries of a route: a base variant and an optional variant used when the
/// request excludes entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    pub base: Vec<QuerySpec>,
    pub with_exclusions: Option<Vec<QuerySpec>>,
}

impl TemplateSet {
    pub fn select(&self, params: &ParameterSet) -> &[QuerySpec] {
        match &self.with_exclusions {
            Some(variant) if params.has_exclusions() => variant,
            _ => &self.base,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &QuerySpec> {
        self.base
            .iter()
            .chain(self.with_exclusions.iter().flatten())
    }
}

/// Enrichment of one query's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentSpec {
    /// Name of the query whose rows are enriched.
    pub query: &'static str,
    pub key_column: &'static str,
    pub fields: &'static [(&'static str, &'static str)],
}

impl EnrichmentSpec {
    /// Engine plan with the given per-call timeout.
    pub fn plan(&self, per_call_timeout: Duration) -> EnrichmentPlan {
        EnrichmentPlan {
            key_column: self.key_column.to_string(),
            fields: self
                .fields
                .iter()
                .map(|(source, target)| FieldMapping::new(*source, *target))
                .collect(),
            per_call_timeout,
        }
    }
}

/// A dashboard endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub path: &'static str,
    pub ttl: Duration,
    pub defaults: ParamDefaults,
    pub queries: TemplateSet,
    pub enrichment: Option<EnrichmentSpec>,
    /// Add `"time": "dd/mm/yy HH:MM"` to the payload.
    pub timestamp: bool,
}

impl RouteSpec {
    pub fn scope_kind(&self) -> ScopeKind {
        self.defaults.scope_kind
    }
}

/// Routes by normalized path.
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    routes: HashMap<String, RouteSpec>,
}

impl RouteCatalog {
    pub fn new(routes: impl IntoIterator<Item = RouteSpec>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|route| (normalize_route(route.path), route))
                .collect(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&RouteSpec> {
        self.routes.get(&normalize_route(path))
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<&'static str> {
        let mut paths: Vec<_> = self.routes.values().map(|r| r.path).collect();
        paths.sort_unstable();
        paths
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteSpec> {
        self.routes.values()
    }

    /// The built-in dashboard routes.
    pub fn dashboards() -> Self {
        Self::new([overview(), grantee(), leaderboard()])
    }
}

// ============================================================================
// BUILT-IN ROUTES
// ============================================================================

const CARD_STATS: &[(&str, &str)] = &[
    ("wallets_stat", "ACTIVE_WALLETS"),
    ("wallets_pct_stat", "PCT_WALLETS"),
    ("tvl_stat", "TVL_GRANTEES"),
    ("tvl_pct_stat", "PCT_TVL"),
    ("gas_stat", "GAS_SPEND"),
    ("gas_pct_stat", "PCT_GAS_SPEND"),
];

const TVL_SPLIT: &[(&str, &[&str])] = &[("tvl_chart", &["TVL_ETH"]), ("tvl_chart_eth", &["TVL"])];

const TVL_POST_GRANT_SPLIT: &[(&str, &[&str])] = &[
    ("tvl_chart_post_grant", &["TVL_ETH"]),
    ("tvl_chart_eth_post_grant", &["TVL"]),
];

fn chain_defaults(timeframe: Timeframe) -> ParamDefaults {
    ParamDefaults {
        timeframe,
        lookback_months: DEFAULT_LOOKBACK_MONTHS,
        scope_arg: "chain",
        scope: Some("all"),
        scope_kind: ScopeKind::Identifier,
    }
}

fn shared_overview_tail() -> Vec<QuerySpec> {
    vec![
        QuerySpec::rows(
            "milestones",
            QueryTemplate::new(r#"SELECT * FROM dbt."ARBIGRANTS_ALL_MILESTONE_SUMMARY""#, &[]),
        ),
        QuerySpec::rows(
            "name_list",
            QueryTemplate::new(
                r#"SELECT "NAME" FROM dbt."ARBIGRANTS_LABELS_PROJECT_METADATA" ORDER BY "NAME""#,
                &[],
            ),
        ),
    ]
}

/// `/overview`: program-wide cards, charts, pies and leaderboard.
pub fn overview() -> RouteSpec {
    use BindParam::*;

    let mut base = vec![
        QuerySpec::rows(
            "cards",
            QueryTemplate::new(
                r#"SELECT "{timeframe}_ACTIVE_WALLETS" AS "ACTIVE_WALLETS",
                          "PCT_{timeframe}_ACTIVE_WALLETS" AS "PCT_WALLETS",
                          "TVL_GRANTEES", "PCT_TVL",
                          "{timeframe}_GAS_SPEND" AS "GAS_SPEND",
                          "PCT_{timeframe}_GAS_SPEND" AS "PCT_GAS_SPEND"
                   FROM dbt."ARBIGRANTS_{scope}_SUMMARY""#,
                &[],
            ),
        )
        .with_projection(Projection::Stats(CARD_STATS)),
        QuerySpec::rows(
            "tvl",
            QueryTemplate::new(
                r#"SELECT "DATE", 'total' AS "CATEGORY", "TVL", "TVL_ETH"
                   FROM dbt."ARBIGRANTS_ALL_{timeframe}_TVL_ARBITRUM_ONE" WHERE "DATE" >= $1
                   UNION ALL
                   SELECT "DATE", 'grantees' AS "CATEGORY", "TVL", "TVL_ETH"
                   FROM dbt."ARBIGRANTS_{scope}_{timeframe}_TVL" WHERE "DATE" >= $1
                   ORDER BY "DATE""#,
                &[StartDate],
            ),
        )
        .with_projection(Projection::Split(TVL_SPLIT)),
        QuerySpec::rows(
            "tvl_post_grant",
            QueryTemplate::new(
                r#"SELECT "DATE", "TVL", "TVL_ETH"
                   FROM dbt."ARBIGRANTS_{scope}_{timeframe}_TVL_POST_GRANT"
                   WHERE "DATE" >= $1 ORDER BY "DATE""#,
                &[StartDate],
            ),
        )
        .with_projection(Projection::Split(TVL_POST_GRANT_SPLIT)),
        QuerySpec::rows(
            "accounts_chart",
            QueryTemplate::new(
                r#"SELECT "DATE", 'total' AS "CATEGORY", "ACTIVE_WALLETS"
                   FROM dbt."ARBIGRANTS_ALL_{timeframe}_ACTIVE_WALLETS_ARBITRUM_ONE" WHERE "DATE" >= $1
                   UNION ALL
                   SELECT "DATE", 'grantees' AS "CATEGORY", "ACTIVE_WALLETS"
                   FROM dbt."ARBIGRANTS_{scope}_{timeframe}_ACTIVE_WALLETS" WHERE "DATE" >= $1
                   ORDER BY "DATE""#,
                &[StartDate],
            ),
        ),
        QuerySpec::rows(
            "accounts_chart_post_grant",
            QueryTemplate::new(
                r#"SELECT * FROM dbt."ARBIGRANTS_{scope}_{timeframe}_ACTIVE_WALLETS_POST_GRANT"
                   WHERE "DATE" >= $1 ORDER BY "DATE""#,
                &[StartDate],
            ),
        ),
        QuerySpec::rows(
            "tvl_pie",
            QueryTemplate::new(r#"SELECT * FROM dbt."ARBIGRANTS_{scope}_TVL_PIE""#, &[]),
        ),
        QuerySpec::rows(
            "accounts_pie",
            QueryTemplate::new(
                r#"SELECT * FROM dbt."ARBIGRANTS_{scope}_{timeframe}_WALLETS_PIE""#,
                &[],
            ),
        ),
        QuerySpec::rows(
            "leaderboard",
            QueryTemplate::new(
                r#"SELECT * FROM dbt."ARBIGRANTS_{scope}_{timeframe}_LEADERBOARD"
                   ORDER BY "WALLETS" DESC"#,
                &[],
            ),
        ),
    ];
    base.extend(shared_overview_tail());

    let mut with_exclusions = vec![
        QuerySpec::rows(
            "cards",
            QueryTemplate::new(
                r#"WITH all_txns AS (
                       SELECT COUNT(DISTINCT from_address) AS wallets,
                              SUM(effective_gas_price * gas_used / 1e18) AS gas
                       FROM raw.transactions
                       WHERE block_timestamp < CURRENT_DATE
                         AND block_timestamp >= CURRENT_DATE - $1::text::interval
                   ), grantee_txns AS (
                       SELECT COUNT(DISTINCT t.from_address) AS wallets,
                              SUM(t.effective_gas_price * t.gas_used / 1e18) AS gas
                       FROM raw.transactions t
                       JOIN dbt."ARBIGRANTS_LABELS_PROJECT_CONTRACTS" c
                         ON c."CONTRACT_ADDRESS" = t.to_address
                       WHERE t.block_timestamp < CURRENT_DATE
                         AND t.block_timestamp >= CURRENT_DATE - $1::text::interval
                         AND c."NAME" <> ALL($2)
                   ), tvl AS (
                       SELECT SUM("TVL") AS grantees,
                              SUM("TVL") / NULLIF(MAX("TOTAL_TVL"), 0) AS pct
                       FROM dbt."ARBIGRANTS_ONE_DAY_TVL_BY_PROJECT"
                       WHERE "DATE" = CURRENT_DATE - 1 AND "NAME" <> ALL($2)
                   )
                   SELECT g.wallets AS "ACTIVE_WALLETS",
                          g.wallets::numeric / NULLIF(a.wallets, 0) AS "PCT_WALLETS",
                          tvl.grantees AS "TVL_GRANTEES",
                          tvl.pct AS "PCT_TVL",
                          g.gas AS "GAS_SPEND",
                          g.gas / NULLIF(a.gas, 0) AS "PCT_GAS_SPEND"
                   FROM all_txns a, grantee_txns g, tvl"#,
                &[Interval, Exclusions],
            ),
        )
        .with_projection(Projection::Stats(CARD_STATS)),
        QuerySpec::rows(
            "tvl",
            QueryTemplate::new(
                r#"SELECT "DATE", 'total' AS "CATEGORY", "TVL", "TVL_ETH"
                   FROM dbt."ARBIGRANTS_ALL_{timeframe}_TVL_ARBITRUM_ONE"
                   WHERE "DATE" >= $1 AND "DATE" < CURRENT_DATE
                   UNION ALL
                   SELECT "DATE", 'grantees' AS "CATEGORY", SUM("TVL") AS "TVL", SUM("TVL_ETH") AS "TVL_ETH"
                   FROM dbt."ARBIGRANTS_ONE_{timeframe}_TVL_BY_PROJECT"
                   WHERE "DATE" >= $1 AND "DATE" < CURRENT_DATE AND "NAME" <> ALL($2)
                   GROUP BY "DATE"
                   ORDER BY "DATE""#,
                &[StartDate, Exclusions],
            ),
        )
        .with_projection(Projection::Split(TVL_SPLIT)),
        QuerySpec::rows(
            "tvl_post_grant",
            QueryTemplate::new(
                r#"SELECT t."DATE", SUM(t."TVL") AS "TVL", SUM(t."TVL_ETH") AS "TVL_ETH"
                   FROM dbt."ARBIGRANTS_ONE_{timeframe}_TVL_BY_PROJECT" t
                   JOIN dbt."ARBIGRANTS_LABELS_PROJECT_METADATA" m ON m."NAME" = t."NAME"
                   WHERE t."DATE" >= $1 AND t."DATE" < CURRENT_DATE
                     AND t."DATE" >= CASE
                         WHEN m."GRANT_DATE" ~ '^[0-9]+/[0-9]+/[0-9]+$'
                         THEN to_date(m."GRANT_DATE", 'MM/DD/YYYY')
                         ELSE DATE '2023-03-01'
                     END
                     AND t."NAME" <> ALL($2)
                   GROUP BY t."DATE"
                   ORDER BY t."DATE""#,
                &[StartDate, Exclusions],
            ),
        )
        .with_projection(Projection::Split(TVL_POST_GRANT_SPLIT)),
        QuerySpec::rows(
            "accounts_chart",
            QueryTemplate::new(
                r#"SELECT "DATE", 'total' AS "CATEGORY", "ACTIVE_WALLETS"
                   FROM dbt."ARBIGRANTS_ALL_{timeframe}_ACTIVE_WALLETS_ARBITRUM_ONE"
                   WHERE "DATE" >= $1
                   UNION ALL
                   SELECT "DATE", 'grantees' AS "CATEGORY", SUM("ACTIVE_WALLETS") AS "ACTIVE_WALLETS"
                   FROM dbt."ARBIGRANTS_ONE_{timeframe}_ACTIVE_WALLETS_BY_PROJECT"
                   WHERE "DATE" >= $1 AND "NAME" <> ALL($2)
                   GROUP BY "DATE"
                   ORDER BY "DATE""#,
                &[StartDate, Exclusions],
            ),
        ),
        QuerySpec::rows(
            "accounts_chart_post_grant",
            QueryTemplate::new(
                r#"SELECT date_trunc('{timeframe}', t.block_timestamp)::date AS "DATE",
                          COUNT(DISTINCT t.from_address) AS "ACTIVE_WALLETS"
                   FROM raw.transactions t
                   JOIN dbt."ARBIGRANTS_LABELS_PROJECT_CONTRACTS" c
                     ON c."CONTRACT_ADDRESS" = t.to_address
                   JOIN dbt."ARBIGRANTS_LABELS_PROJECT_METADATA" m ON m."NAME" = c."NAME"
                   WHERE t.block_timestamp >= $1
                     AND t.block_timestamp < date_trunc('{timeframe}', CURRENT_DATE)
                     AND t.block_timestamp >= CASE
                         WHEN m."GRANT_DATE" ~ '^[0-9]+/[0-9]+/[0-9]+$'
                         THEN to_date(m."GRANT_DATE", 'MM/DD/YYYY')
                         ELSE DATE '2023-03-01'
                     END
                     AND m."NAME" <> ALL($2)
                   GROUP BY 1
                   ORDER BY 1"#,
                &[StartDate, Exclusions],
            ),
        ),
        QuerySpec::rows(
            "tvl_pie",
            QueryTemplate::new(
                r#"WITH ranked AS (
                       SELECT "NAME", "TVL", SUM("TVL") OVER () AS total,
                              RANK() OVER (ORDER BY "TVL" DESC) AS rnk
                       FROM dbt."ARBIGRANTS_ONE_DAY_TVL_BY_PROJECT"
                       WHERE "DATE" = CURRENT_DATE - 1 AND "NAME" <> ALL($1)
                   )
                   SELECT CASE WHEN rnk <= 5 THEN "NAME" ELSE 'Other' END AS "NAME",
                          SUM("TVL") AS "TVL",
                          ROUND((SUM("TVL") / NULLIF(MAX(total), 0) * 100)::numeric, 2) AS "PCT_TVL"
                   FROM ranked
                   GROUP BY 1
                   ORDER BY "TVL" DESC"#,
                &[Exclusions],
            ),
        ),
        QuerySpec::rows(
            "accounts_pie",
            QueryTemplate::new(
                r#"WITH per_project AS (
                       SELECT c."NAME", COUNT(DISTINCT t.from_address) AS wallets
                       FROM raw.transactions t
                       JOIN dbt."ARBIGRANTS_LABELS_PROJECT_CONTRACTS" c
                         ON c."CONTRACT_ADDRESS" = t.to_address
                       WHERE t.block_timestamp < CURRENT_DATE
                         AND t.block_timestamp >= CURRENT_DATE - $1::text::interval
                         AND c."NAME" <> ALL($2)
                       GROUP BY c."NAME"
                   ), ranked AS (
                       SELECT "NAME", wallets, SUM(wallets) OVER () AS total,
                              RANK() OVER (ORDER BY wallets DESC) AS rnk
                       FROM per_project
                   )
                   SELECT CASE WHEN rnk <= 5 THEN "NAME" ELSE 'Other' END AS "NAME",
                          SUM(wallets) AS "ACTIVE_WALLETS",
                          ROUND((SUM(wallets) / NULLIF(MAX(total), 0) * 100)::numeric, 2) AS "PCT_WALLETS"
                   FROM ranked
                   GROUP BY 1
                   ORDER BY "ACTIVE_WALLETS" DESC"#,
                &[Interval, Exclusions],
            ),
        ),
        QuerySpec::rows(
            "leaderboard",
            QueryTemplate::new(
                r#"SELECT * FROM dbt."ARBIGRANTS_ONE_{timeframe}_LEADERBOARD"
                   WHERE "PROJECT" <> ALL($1)
                   ORDER BY "WALLETS" DESC"#,
                &[Exclusions],
            ),
        ),
    ];
    with_exclusions.extend(shared_overview_tail());

    RouteSpec {
        path: "/overview",
        ttl: DASHBOARD_TTL,
        defaults: chain_defaults(Timeframe::Month),
        queries: TemplateSet {
            base,
            with_exclusions: Some(with_exclusions),
        },
        enrichment: None,
        timestamp: true,
    }
}

/// `/grantee`: one grantee's profile and activity charts.
pub fn grantee() -> RouteSpec {
    use BindParam::*;

    let queries = vec![
        QuerySpec::rows(
            "info",
            QueryTemplate::new(
                r#"SELECT "NAME", "LOGO", "DESCRIPTION", "WEBSITE", "TWITTER", "DUNE"
                   FROM dbt."ARBIGRANTS_LABELS_PROJECT_METADATA" WHERE "NAME" = $1"#,
                &[Scope],
            ),
        ),
        QuerySpec::rows(
            "wallets_chart",
            QueryTemplate::new(
                r#"SELECT "DATE", "ACTIVE_WALLETS"
                   FROM dbt."ARBIGRANTS_ALL_{timeframe}_ACTIVE_WALLETS_BY_PROJECT"
                   WHERE "NAME" = $1 ORDER BY "DATE""#,
                &[Scope],
            ),
        ),
        QuerySpec::rows(
            "gas_chart",
            QueryTemplate::new(
                r#"SELECT "DATE", "GAS_SPEND"
                   FROM dbt."ARBIGRANTS_ALL_{timeframe}_GAS_SPEND_BY_PROJECT"
                   WHERE "NAME" = $1 ORDER BY "DATE""#,
                &[Scope],
            ),
        ),
        QuerySpec::rows(
            "txns_chart",
            QueryTemplate::new(
                r#"SELECT to_char(date_trunc('{timeframe}', t.block_timestamp), 'YYYY-MM-DD') AS "DATE",
                          COUNT(*) AS "TRANSACTIONS"
                   FROM raw.transactions t
                   JOIN dbt."ARBIGRANTS_LABELS_PROJECT_CONTRACTS" c
                     ON c."CONTRACT_ADDRESS" = t.to_address
                   WHERE t.block_timestamp < date_trunc('{timeframe}', CURRENT_DATE)
                     AND t.block_timestamp >= DATE '2023-06-01'
                     AND c."NAME" = $1
                   GROUP BY 1 ORDER BY 1"#,
                &[Scope],
            ),
        ),
        QuerySpec::rows(
            "llama_bool",
            QueryTemplate::new(
                r#"SELECT CASE WHEN "LLAMA_NAME" <> '' THEN 1 ELSE 0 END AS "LLAMA_COUNT"
                   FROM dbt."ARBIGRANTS_LABELS_PROJECT_METADATA" WHERE "NAME" = $1"#,
                &[Scope],
            ),
        ),
        QuerySpec::rows(
            "tvl_chart",
            QueryTemplate::new(
                r#"SELECT "DATE", "TVL"
                   FROM dbt."ARBIGRANTS_ALL_{timeframe}_TVL_BY_PROJECT"
                   WHERE "NAME" = $1 ORDER BY "DATE""#,
                &[Scope],
            ),
        )
        .gated_on("llama_bool", "LLAMA_COUNT"),
        QuerySpec::rows(
            "grant_date_bool",
            QueryTemplate::new(
                r#"SELECT CASE WHEN "GRANT_DATE" <> '' THEN 1 ELSE 0 END AS "GRANT_DATE_COUNT"
                   FROM dbt."ARBIGRANTS_LABELS_PROJECT_METADATA" WHERE "NAME" = $1"#,
                &[Scope],
            ),
        ),
        QuerySpec::rows(
            "grant_date",
            QueryTemplate::new(
                r#"SELECT "GRANT_DATE" FROM dbt."ARBIGRANTS_LABELS_PROJECT_METADATA" WHERE "NAME" = $1"#,
                &[Scope],
            ),
        )
        .gated_on("grant_date_bool", "GRANT_DATE_COUNT"),
        QuerySpec::rows(
            "milestones",
            QueryTemplate::new(
                r#"SELECT "MILESTONES_COMPLETED", "TOTAL_MILESTONES"
                   FROM dbt."ARBIGRANTS_LABELS_PROJECT_MILESTONES" WHERE "NAME" = $1"#,
                &[Scope],
            ),
        ),
    ];

    RouteSpec {
        path: "/grantee",
        ttl: DASHBOARD_TTL,
        defaults: ParamDefaults {
            timeframe: Timeframe::Week,
            lookback_months: DEFAULT_LOOKBACK_MONTHS,
            scope_arg: "grantee_name",
            scope: Some("pendle"),
            scope_kind: ScopeKind::Value,
        },
        queries: TemplateSet {
            base: queries,
            with_exclusions: None,
        },
        enrichment: None,
        timestamp: false,
    }
}

const LEADERBOARD_FIELDS: &[(&str, &str)] = &[
    ("/currentChainTvls/Arbitrum", "LLAMA_TVL"),
    ("/mcap", "MCAP"),
    ("/category", "LLAMA_CATEGORY"),
];

/// `/leaderboard`: grantee ranking enriched with live protocol data.
pub fn leaderboard() -> RouteSpec {
    use BindParam::*;

    RouteSpec {
        path: "/leaderboard",
        ttl: LEADERBOARD_TTL,
        defaults: chain_defaults(Timeframe::Month),
        queries: TemplateSet {
            base: vec![QuerySpec::rows(
                "leaderboard",
                QueryTemplate::new(
                    r#"SELECT * FROM dbt."ARBIGRANTS_{scope}_{timeframe}_LEADERBOARD"
                       ORDER BY "WALLETS" DESC"#,
                    &[],
                ),
            )],
            with_exclusions: Some(vec![QuerySpec::rows(
                "leaderboard",
                QueryTemplate::new(
                    r#"SELECT * FROM dbt."ARBIGRANTS_{scope}_{timeframe}_LEADERBOARD"
                       WHERE "PROJECT" <> ALL($1)
                       ORDER BY "WALLETS" DESC"#,
                    &[Exclusions],
                ),
            )]),
        },
        enrichment: Some(EnrichmentSpec {
            query: "leaderboard",
            key_column: "SLUG",
            fields: LEADERBOARD_FIELDS,
        }),
        timestamp: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};
    use tally_core::{normalize, RawParams};

    #[test]
    fn test_dashboards_registered() {
        let catalog = RouteCatalog::dashboards();
        assert_eq!(catalog.paths(), vec!["/grantee", "/leaderboard", "/overview"]);
        assert!(catalog.get("overview/").is_some());
        assert!(catalog.get("/nope").is_none());
    }

    #[test]
    fn test_ttls() {
        let catalog = RouteCatalog::dashboards();
        assert_eq!(catalog.get("/overview").map(|r| r.ttl), Some(DASHBOARD_TTL));
        assert_eq!(catalog.get("/grantee").map(|r| r.ttl), Some(DASHBOARD_TTL));
        assert_eq!(catalog.get("/leaderboard").map(|r| r.ttl), Some(LEADERBOARD_TTL));
    }

    #[test]
    fn test_placeholders_match_bindings() {
        for route in RouteCatalog::dashboards().routes() {
            for query in route.queries.all() {
                assert_eq!(
                    query.template.highest_placeholder(),
                    query.template.bindings.len(),
                    "{} {}",
                    route.path,
                    query.name
                );
            }
        }
    }

    #[test]
    fn test_value_scoped_routes_never_use_scope_slot() {
        for route in RouteCatalog::dashboards().routes() {
            if route.scope_kind() == ScopeKind::Value {
                for query in route.queries.all() {
                    assert!(!query.template.sql.contains("{scope}"), "{}", query.name);
                }
            }
        }
    }

    #[test]
    fn test_gates_reference_earlier_queries() {
        for route in RouteCatalog::dashboards().routes() {
            for variant in [Some(&route.queries.base), route.queries.with_exclusions.as_ref()]
                .into_iter()
                .flatten()
            {
                let mut seen = HashSet::new();
                for query in variant {
                    if let Some(gate) = &query.gate {
                        assert!(seen.contains(gate.query), "{} gates on unknown {}", query.name, gate.query);
                    }
                    seen.insert(query.name);
                }
            }
        }
    }

    #[test]
    fn test_variant_selection() {
        let overview = overview();
        let plain = normalize(&RawParams::new(), &overview.defaults);
        let excluding = normalize(
            &[("excludes", "gmx")].into_iter().collect(),
            &overview.defaults,
        );

        let base = overview.queries.select(&plain);
        let variant = overview.queries.select(&excluding);
        assert!(base[0].template.bindings.is_empty());
        assert_eq!(variant[0].template.bindings, &[BindParam::Interval, BindParam::Exclusions]);
    }

    fn output_keys(queries: &[QuerySpec]) -> BTreeSet<&'static str> {
        queries
            .iter()
            .flat_map(|query| match query.projection {
                Projection::Rows => vec![query.name],
                Projection::Stats(stats) => stats.iter().map(|(key, _)| *key).collect(),
                Projection::Split(splits) => splits.iter().map(|(key, _)| *key).collect(),
            })
            .collect()
    }

    #[test]
    fn test_exclusion_variants_keep_payload_shape() {
        for route in RouteCatalog::dashboards().routes() {
            if let Some(variant) = &route.queries.with_exclusions {
                assert_eq!(output_keys(variant), output_keys(&route.queries.base), "{}", route.path);
            }
        }

        let keys = output_keys(overview().queries.with_exclusions.as_deref().unwrap());
        for key in ["tvl_chart_post_grant", "tvl_chart_eth_post_grant", "accounts_chart_post_grant", "accounts_pie"] {
            assert!(keys.contains(key), "{}", key);
        }
    }

    #[test]
    fn test_enrichment_plan() {
        let route = leaderboard();
        let plan = route
            .enrichment
            .as_ref()
            .map(|spec| spec.plan(Duration::from_millis(500)))
            .unwrap();
        assert_eq!(plan.key_column, "SLUG");
        assert_eq!(plan.fields.len(), 3);
        assert_eq!(plan.per_call_timeout, Duration::from_millis(500));
    }
}
