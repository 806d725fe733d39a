use super::{STAGE_TIMEOUT, StageEnv, render_template};
use crate::catalog::MetricFamily;
use crate::context::Context;
use crate::executor::QueryExecutor;
use crate::gate::ExtensionSet;
use crate::models::BlockingSession;
use crate::params::CommonParameters;
use crate::text::anonymize_in_place;

/// Collects and emits blocked/blocking session pairs.
///
/// On 12 and 13 the activity view exposes raw statement text, so both
/// statements are redacted here before ingestion.
pub fn populate_blocking_sessions<E>(
    executor: &mut E,
    parent: &Context,
    env: &StageEnv<'_>,
    params: &CommonParameters,
    extensions: &ExtensionSet,
) -> Vec<BlockingSession>
where
    E: QueryExecutor + ?Sized,
{
    let family = MetricFamily::BlockingSessions;
    let Some(entry) = env.prepare(family, params, extensions) else {
        return Vec::new();
    };
    let count = params.count_threshold.to_string();
    let sql = render_template(
        entry.template,
        &[("databases", &params.databases), ("count", &count)],
    );

    let ctx = parent.child(STAGE_TIMEOUT);
    let Some(mut rows) = env.fetch::<_, BlockingSession>(family, executor, &ctx, &sql) else {
        return Vec::new();
    };
    if !entry.anonymized_server_side {
        for row in &mut rows {
            anonymize_in_place(&mut row.blocked_query);
            anonymize_in_place(&mut row.blocking_query);
        }
    }
    env.emit(family, rows, params)
}
