use super::{StageEnv, WAIT_EVENTS_TIMEOUT, render_template};
use crate::catalog::MetricFamily;
use crate::context::Context;
use crate::executor::QueryExecutor;
use crate::gate::ExtensionSet;
use crate::models::WaitEvent;
use crate::params::CommonParameters;
use crate::text::anonymize_in_place;

/// Collects and emits per-statement wait-event totals.
pub fn populate_wait_events<E>(
    executor: &mut E,
    parent: &Context,
    env: &StageEnv<'_>,
    params: &CommonParameters,
    extensions: &ExtensionSet,
) -> Vec<WaitEvent>
where
    E: QueryExecutor + ?Sized,
{
    let family = MetricFamily::WaitEvents;
    let Some(entry) = env.prepare(family, params, extensions) else {
        return Vec::new();
    };
    let count = params.count_threshold.to_string();
    let sql = render_template(
        entry.template,
        &[("databases", &params.databases), ("count", &count)],
    );

    let ctx = parent.child(WAIT_EVENTS_TIMEOUT);
    let Some(mut rows) = env.fetch::<_, WaitEvent>(family, executor, &ctx, &sql) else {
        return Vec::new();
    };
    if !entry.anonymized_server_side {
        for row in &mut rows {
            anonymize_in_place(&mut row.query_text);
        }
    }
    env.emit(family, rows, params)
}
