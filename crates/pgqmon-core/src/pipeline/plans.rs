use std::collections::BTreeMap;

use tracing::debug;

use super::{EXPLAIN_TIMEOUT, StageEnv};
use crate::catalog::MetricFamily;
use crate::context::Context;
use crate::error::QpmError;
use crate::executor::{Connector, QueryExecutor};
use crate::explain::{PLAN_COLUMN, PlanSource, flatten_plan};
use crate::gate::ExtensionSet;
use crate::limiter::ExplainRateLimiter;
use crate::models::{ExecutionPlanNode, IndividualQuery};
use crate::params::CommonParameters;
use crate::plan_id::new_plan_id;

/// Whether `sql` can be sent to `EXPLAIN` verbatim.
///
/// Rejects empty text, statements with bind placeholders (`$1`), more than
/// one statement and statements that are already `EXPLAIN`.
pub fn is_explainable(sql: &str) -> bool {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() || statement.contains(';') {
        return false;
    }
    if statement
        .get(..7)
        .is_some_and(|head| head.eq_ignore_ascii_case("explain"))
    {
        return false;
    }
    !statement
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'$' && w[1].is_ascii_digit())
}

/// Captures and emits execution plans of sampled statements.
///
/// Statements are grouped by database and explained over a connection to
/// that database. Every `EXPLAIN` takes one limiter token. A database that
/// cannot be reached or a plan that cannot be captured is counted as an
/// error and skipped.
pub fn populate_execution_plans<C: Connector>(
    connector: &C,
    parent: &Context,
    env: &StageEnv<'_>,
    limiter: &ExplainRateLimiter,
    params: &CommonParameters,
    extensions: &ExtensionSet,
    queries: &[IndividualQuery],
) -> Vec<ExecutionPlanNode> {
    let family = MetricFamily::ExecutionPlans;
    let Some(entry) = env.prepare(family, params, extensions) else {
        return Vec::new();
    };
    if queries.is_empty() {
        debug!("no sampled queries to explain");
        return Vec::new();
    }

    let mut by_database: BTreeMap<&str, Vec<&IndividualQuery>> = BTreeMap::new();
    for query in queries {
        match query.database_name.as_deref() {
            Some(db) => by_database.entry(db).or_default().push(query),
            None => debug!(query_id = ?query.query_id, "sampled query without database"),
        }
    }

    let mut nodes = Vec::new();
    'databases: for (database, queries) in by_database {
        let mut executor = match connector.connect(database) {
            Ok(exec) => exec,
            Err(e) => {
                env.stage_failed(family, &e);
                continue;
            }
        };
        for query in queries {
            if let Err(e) = parent.check() {
                env.stage_failed(family, &e);
                break 'databases;
            }
            let Some(text) = query
                .real_query_text
                .as_deref()
                .or(query.query_text.as_deref())
            else {
                continue;
            };
            if !is_explainable(text) {
                debug!(query_id = ?query.query_id, "statement cannot be explained as is, skipping");
                continue;
            }
            match capture(&mut executor, parent, limiter, entry.template, query, text) {
                Ok(plan) => {
                    env.metrics.inc_plans();
                    nodes.extend(plan);
                }
                Err(e) => {
                    debug!(database, query_id = ?query.query_id, "plan capture failed");
                    env.stage_failed(family, &e);
                }
            }
        }
    }
    env.emit(family, nodes, params)
}

fn capture<E>(
    executor: &mut E,
    parent: &Context,
    limiter: &ExplainRateLimiter,
    prefix: &str,
    query: &IndividualQuery,
    text: &str,
) -> Result<Vec<ExecutionPlanNode>, QpmError>
where
    E: QueryExecutor + ?Sized,
{
    let ctx = parent.child(EXPLAIN_TIMEOUT);
    limiter.acquire(&ctx)?;

    let statement = text.trim().trim_end_matches(';').trim_end();
    let rows = executor.query(&ctx, &format!("{prefix}{statement}"))?;
    let document = rows
        .first()
        .and_then(|row| row.get(PLAN_COLUMN).or_else(|| row.get_index(0)))
        .ok_or_else(|| QpmError::Query("EXPLAIN returned no plan".to_string()))?;

    let source = PlanSource {
        query_id: query.query_id.clone(),
        query_text: query.query_text.clone(),
        database_name: query.database_name.clone(),
        plan_id: new_plan_id()?,
    };
    flatten_plan(document, &source)
}
