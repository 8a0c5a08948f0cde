//! Dashboard Endpoints
//!
//! One handler serves every catalog route. The matched path selects the
//! route; repeated query arguments are passed through in order.

use axum::{
    extract::{MatchedPath, State},
    http::Uri,
    response::{IntoResponse, Response},
    Json,
};
use tally_core::RawParams;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::DashboardPipeline;

/// Response header carrying `hit` or `miss`.
pub const CACHE_HEADER: &str = "x-cache";

/// GET /{route} - Memoized dashboard payload
pub async fn get_dashboard(
    State(pipeline): State<DashboardPipeline>,
    path: MatchedPath,
    uri: Uri,
) -> ApiResult<Response> {
    let raw = query_args(uri.query().unwrap_or_default());
    let read = pipeline.get_or_compute(path.as_str(), &raw).await?;
    let outcome = read.outcome().as_str();

    Ok(([(CACHE_HEADER, outcome)], Json(read.into_value())).into_response())
}

/// Fallback for paths outside the catalog.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::route_not_found(uri.path())
}

/// Split a query string into decoded pairs without ever rejecting it.
///
/// `+` is a space, a pair without `=` has an empty value, and bad percent
/// escapes or invalid UTF-8 are kept lossily for the normalizer to judge.
fn query_args(query: &str) -> RawParams {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(name), decode(value))
        })
        .collect()
}

fn decode(part: &str) -> String {
    let spaced = part.replace('+', " ");
    let bytes = urlencoding::decode_binary(spaced.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(query: &str) -> Vec<(String, String)> {
        let raw = query_args(query);
        ["timeframe", "excludes", "chain", "flag"]
            .iter()
            .flat_map(|name| raw.all(name).map(move |v| (name.to_string(), v.to_string())))
            .collect()
    }

    #[test]
    fn test_query_args_decoding() {
        assert_eq!(
            pairs("timeframe=week&excludes=gmx&excludes=camelot+dex&chain=arb%20one"),
            vec![
                ("timeframe".into(), "week".into()),
                ("excludes".into(), "gmx".into()),
                ("excludes".into(), "camelot dex".into()),
                ("chain".into(), "arb one".into()),
            ]
        );
    }

    #[test]
    fn test_query_args_never_reject() {
        assert!(query_args("").is_empty());
        assert_eq!(pairs("flag&&timeframe=%zz"), vec![
            ("timeframe".into(), "%zz".into()),
            ("flag".into(), "".into()),
        ]);
        assert_eq!(query_args("chain=%ff%fe").first("chain"), Some("\u{fffd}\u{fffd}"));
    }
}
