use std::collections::BTreeSet;

use tracing::debug;

use super::{STAGE_TIMEOUT, StageEnv, render_template};
use crate::catalog::MetricFamily;
use crate::context::Context;
use crate::executor::QueryExecutor;
use crate::gate::ExtensionSet;
use crate::models::{IndividualQuery, SlowQuery};
use crate::params::CommonParameters;
use crate::text::anonymize_in_place;

/// Upper bound on sampled executions per run.
pub const MAX_INDIVIDUAL_QUERY_COUNT: i64 = 10;

/// Samples individual executions of the statements found by the slow-query
/// stage and emits them.
///
/// The unredacted text is kept in `real_query_text` for plan capture.
pub fn populate_individual_queries<E>(
    executor: &mut E,
    parent: &Context,
    env: &StageEnv<'_>,
    params: &CommonParameters,
    extensions: &ExtensionSet,
    slow: &[SlowQuery],
) -> Vec<IndividualQuery>
where
    E: QueryExecutor + ?Sized,
{
    let family = MetricFamily::IndividualQueries;
    let Some(entry) = env.prepare(family, params, extensions) else {
        return Vec::new();
    };
    let query_ids = query_id_list(slow);
    if query_ids.is_empty() {
        debug!("no slow queries to sample");
        return Vec::new();
    }

    let count = params
        .count_threshold
        .min(MAX_INDIVIDUAL_QUERY_COUNT)
        .to_string();
    let response_time = params.response_time_threshold.to_string();
    let sql = render_template(
        entry.template,
        &[
            ("query_ids", &query_ids),
            ("databases", &params.databases),
            ("response_time", &response_time),
            ("count", &count),
        ],
    );

    let ctx = parent.child(STAGE_TIMEOUT);
    let Some(mut rows) = env.fetch::<_, IndividualQuery>(family, executor, &ctx, &sql) else {
        return Vec::new();
    };
    for row in &mut rows {
        row.real_query_text = row.query_text.clone();
        if !entry.anonymized_server_side {
            anonymize_in_place(&mut row.query_text);
        }
    }
    env.emit(family, rows, params)
}

/// Quoted, de-duplicated list of slow-query ids. Ids that are not integers
/// are dropped so nothing but numbers reaches the statement text.
fn query_id_list(slow: &[SlowQuery]) -> String {
    let ids: BTreeSet<i64> = slow
        .iter()
        .filter_map(|q| q.query_id.as_deref())
        .filter_map(|id| id.trim().parse::<i64>().ok())
        .collect();
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(",")
}
