//! Parameterized query templates.
//!
//! A template is static SQL with two kinds of holes:
//!
//! - Text slots, substituted before execution. Only `{timeframe}` (a token
//!   from a closed set) and `{scope}` (a validated identifier) exist.
//! - Positional placeholders `$1..$n`, bound to values derived from the
//!   request. Every caller-supplied value travels this way.

use chrono::NaiveDate;
use tally_core::{params::is_identifier, Binding, ConfigError, ParameterSet, RenderedQuery, ScopeKind};

/// Text slot replaced by the timeframe table token (`DAY`/`WEEK`/`MONTH`).
pub const TIMEFRAME_SLOT: &str = "{timeframe}";

/// Text slot replaced by the uppercased scope identifier.
pub const SCOPE_SLOT: &str = "{scope}";

/// A value bound to a positional placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindParam {
    /// First day of the lookback window (`date`).
    StartDate,
    /// Excluded entity names (`text[]`, use as `<> ALL($n)`).
    Exclusions,
    /// The scope filter as a value (`text`).
    Scope,
    /// Trailing window of one period (`text`, cast with `::text::interval`).
    Interval,
}

/// Static SQL plus its bindings in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    pub sql: &'static str,
    pub bindings: &'static [BindParam],
}

/// Request-derived inputs to rendering.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub params: &'a ParameterSet,
    pub scope_kind: ScopeKind,
    pub today: NaiveDate,
}

impl QueryTemplate {
    pub const fn new(sql: &'static str, bindings: &'static [BindParam]) -> Self {
        Self { sql, bindings }
    }

    /// Render into an executable query named `name`.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the template uses `{scope}` on a route whose
    /// scope is a value, or a binding the parameter set cannot satisfy.
    pub fn render(&self, name: &str, ctx: &RenderContext<'_>) -> Result<RenderedQuery, ConfigError> {
        let mut sql = self
            .sql
            .replace(TIMEFRAME_SLOT, ctx.params.timeframe.table_token());

        if sql.contains(SCOPE_SLOT) {
            sql = sql.replace(SCOPE_SLOT, &scope_token(name, ctx)?);
        }

        let bindings = self
            .bindings
            .iter()
            .map(|param| bind(*param, name, ctx))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RenderedQuery::new(name, sql, bindings))
    }

    /// Highest `$n` placeholder in the SQL text (0 when there is none).
    pub fn highest_placeholder(&self) -> usize {
        let bytes = self.sql.as_bytes();
        let mut highest = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = self.sql[start..end].parse::<usize>() {
                    highest = highest.max(n);
                }
                i = end.max(i + 1);
            } else {
                i += 1;
            }
        }
        highest
    }
}

fn scope_token(query: &str, ctx: &RenderContext<'_>) -> Result<String, ConfigError> {
    if ctx.scope_kind != ScopeKind::Identifier {
        return Err(ConfigError::InvalidValue {
            field: format!("{}.sql", query),
            value: SCOPE_SLOT.to_string(),
            reason: "route scope is a value and cannot be used as a table token".to_string(),
        });
    }
    match ctx.params.scope.as_deref() {
        Some(scope) if is_identifier(scope) => Ok(scope.to_ascii_uppercase()),
        _ => Err(ConfigError::MissingField {
            field: format!("{}: identifier scope", query),
        }),
    }
}

fn bind(param: BindParam, query: &str, ctx: &RenderContext<'_>) -> Result<Binding, ConfigError> {
    Ok(match param {
        BindParam::StartDate => Binding::Date(ctx.params.start_date(ctx.today)),
        BindParam::Exclusions => Binding::TextList(ctx.params.exclusion_list()),
        BindParam::Interval => Binding::Text(ctx.params.timeframe.interval().to_string()),
        BindParam::Scope => match &ctx.params.scope {
            Some(scope) => Binding::Text(scope.clone()),
            None => {
                return Err(ConfigError::MissingField {
                    field: format!("{}: scope", query),
                })
            }
        },
    })
}
