use tracing::debug;

use super::{STAGE_TIMEOUT, StageEnv, render_template};
use crate::catalog::MetricFamily;
use crate::context::Context;
use crate::executor::QueryExecutor;
use crate::gate::ExtensionSet;
use crate::models::SlowQuery;
use crate::params::CommonParameters;
use crate::text::anonymize_in_place;

/// Collects and emits the slowest normalized statements.
///
/// The result seeds the individual-query stage.
pub fn populate_slow_queries<E>(
    executor: &mut E,
    parent: &Context,
    env: &StageEnv<'_>,
    params: &CommonParameters,
    extensions: &ExtensionSet,
) -> Vec<SlowQuery>
where
    E: QueryExecutor + ?Sized,
{
    let family = MetricFamily::SlowQueries;
    let Some(entry) = env.prepare(family, params, extensions) else {
        return Vec::new();
    };
    let count = params.count_threshold.to_string();
    let sql = render_template(
        entry.template,
        &[("databases", &params.databases), ("count", &count)],
    );

    let ctx = parent.child(STAGE_TIMEOUT);
    let Some(mut rows) = env.fetch::<_, SlowQuery>(family, executor, &ctx, &sql) else {
        return Vec::new();
    };
    debug!(count = rows.len(), "slow queries fetched");
    if !entry.anonymized_server_side {
        for row in &mut rows {
            anonymize_in_place(&mut row.query_text);
        }
    }
    env.emit(family, rows, params)
}
