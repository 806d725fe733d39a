//! Parsing and flattening of `EXPLAIN (FORMAT JSON)` output.

use serde::Deserialize;

use crate::error::QpmError;
use crate::models::ExecutionPlanNode;

/// Column holding the plan document in `EXPLAIN` output.
pub const PLAN_COLUMN: &str = "QUERY PLAN";

#[derive(Debug, Deserialize)]
struct ExplainDocument {
    #[serde(rename = "Plan")]
    plan: PlanNode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlanNode {
    #[serde(rename = "Node Type")]
    node_type: Option<String>,
    #[serde(rename = "Parallel Aware")]
    parallel_aware: Option<bool>,
    #[serde(rename = "Async Capable")]
    async_capable: Option<bool>,
    #[serde(rename = "Scan Direction")]
    scan_direction: Option<String>,
    #[serde(rename = "Index Name")]
    index_name: Option<String>,
    #[serde(rename = "Relation Name")]
    relation_name: Option<String>,
    #[serde(rename = "Alias")]
    alias: Option<String>,
    #[serde(rename = "Startup Cost")]
    startup_cost: Option<f64>,
    #[serde(rename = "Total Cost")]
    total_cost: Option<f64>,
    #[serde(rename = "Plan Rows")]
    plan_rows: Option<i64>,
    #[serde(rename = "Plan Width")]
    plan_width: Option<i64>,
    #[serde(rename = "Rows Removed by Filter")]
    rows_removed_by_filter: Option<i64>,
    #[serde(rename = "Plans")]
    plans: Vec<PlanNode>,
}

/// Identity of the statement a plan belongs to.
#[derive(Debug, Clone, Default)]
pub struct PlanSource {
    pub query_id: Option<String>,
    pub query_text: Option<String>,
    pub database_name: Option<String>,
    pub plan_id: String,
}

/// Parses one plan document and returns its nodes in pre-order.
///
/// `level_id` counts nodes in visiting order starting at 0.
pub fn flatten_plan(json: &str, source: &PlanSource) -> Result<Vec<ExecutionPlanNode>, QpmError> {
    let docs: Vec<ExplainDocument> = serde_json::from_str(json).map_err(|e| QpmError::Decode {
        column: PLAN_COLUMN.to_string(),
        message: e.to_string(),
    })?;
    let root = docs.into_iter().next().ok_or_else(|| QpmError::Decode {
        column: PLAN_COLUMN.to_string(),
        message: "empty plan document".to_string(),
    })?;

    let mut out = Vec::new();
    let mut stack = vec![root.plan];
    while let Some(mut node) = stack.pop() {
        let children = std::mem::take(&mut node.plans);
        out.push(ExecutionPlanNode {
            query_id: source.query_id.clone(),
            query_text: source.query_text.clone(),
            database_name: source.database_name.clone(),
            plan_id: Some(source.plan_id.clone()),
            level_id: Some(out.len() as i64),
            node_type: node.node_type,
            parallel_aware: node.parallel_aware,
            async_capable: node.async_capable,
            scan_direction: node.scan_direction,
            index_name: node.index_name,
            relation_name: node.relation_name,
            alias: node.alias,
            startup_cost: node.startup_cost,
            total_cost: node.total_cost,
            plan_rows: node.plan_rows,
            plan_width: node.plan_width,
            rows_removed_by_filter: node.rows_removed_by_filter,
        });
        stack.extend(children.into_iter().rev());
    }
    Ok(out)
}
