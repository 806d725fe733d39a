//! Telemetry record shapes, one per metric family.
//!
//! Field names match the columns of the corresponding query templates, so
//! rows decode by name. Telemetry names equal the column names.

use crate::metric_record;

metric_record! {
    /// A normalized statement from `pg_stat_statements`.
    pub struct SlowQuery {
        pub query_id: Option<String> => attribute("query_id"),
        pub query_text: Option<String> => attribute("query_text"),
        pub database_name: Option<String> => attribute("database_name"),
        pub schema_name: Option<String> => attribute("schema_name"),
        pub execution_count: Option<i64> => gauge("execution_count"),
        pub avg_elapsed_time_ms: Option<f64> => gauge("avg_elapsed_time_ms"),
        pub avg_disk_reads: Option<f64> => gauge("avg_disk_reads"),
        pub avg_disk_writes: Option<f64> => gauge("avg_disk_writes"),
        pub statement_type: Option<String> => attribute("statement_type"),
        pub collection_timestamp: Option<String> => attribute("collection_timestamp"),
    }
}

metric_record! {
    /// Time a statement spent in one wait event.
    pub struct WaitEvent {
        pub wait_event_name: Option<String> => attribute("wait_event_name"),
        pub wait_category: Option<String> => attribute("wait_category"),
        pub total_wait_time_ms: Option<f64> => gauge("total_wait_time_ms"),
        pub collection_timestamp: Option<String> => attribute("collection_timestamp"),
        pub query_id: Option<String> => attribute("query_id"),
        pub query_text: Option<String> => attribute("query_text"),
        pub database_name: Option<String> => attribute("database_name"),
    }
}

metric_record! {
    /// A session waiting on a lock held by another session.
    pub struct BlockingSession {
        pub blocked_pid: Option<i64> => gauge("blocked_pid"),
        pub blocked_query: Option<String> => attribute("blocked_query"),
        pub blocked_query_id: Option<String> => attribute("blocked_query_id"),
        pub blocked_query_start: Option<String> => attribute("blocked_query_start"),
        pub database_name: Option<String> => attribute("database_name"),
        pub blocking_pid: Option<i64> => gauge("blocking_pid"),
        pub blocking_query: Option<String> => attribute("blocking_query"),
        pub blocking_query_id: Option<String> => attribute("blocking_query_id"),
        pub blocking_query_start: Option<String> => attribute("blocking_query_start"),
    }
}

metric_record! {
    /// A sampled execution of a slow statement from `pg_stat_monitor`.
    ///
    /// `real_query_text` keeps the unredacted text for plan capture and is
    /// never emitted.
    pub struct IndividualQuery {
        pub query_text: Option<String> => attribute("query_text"),
        pub query_id: Option<String> => attribute("query_id"),
        pub database_name: Option<String> => attribute("database_name"),
        pub plan_id: Option<String> => attribute("plan_id"),
        pub cpu_time_ms: Option<f64> => gauge("cpu_time_ms"),
        pub avg_exec_time_ms: Option<f64> => gauge("avg_exec_time_ms"),
        pub real_query_text: Option<String> => skip,
    }
}

metric_record! {
    /// One node of a captured plan tree, flattened pre-order.
    pub struct ExecutionPlanNode {
        pub query_id: Option<String> => attribute("query_id"),
        pub query_text: Option<String> => attribute("query_text"),
        pub database_name: Option<String> => attribute("database_name"),
        pub plan_id: Option<String> => attribute("plan_id"),
        pub level_id: Option<i64> => gauge("level_id"),
        pub node_type: Option<String> => attribute("node_type"),
        pub parallel_aware: Option<bool> => attribute("parallel_aware"),
        pub async_capable: Option<bool> => attribute("async_capable"),
        pub scan_direction: Option<String> => attribute("scan_direction"),
        pub index_name: Option<String> => attribute("index_name"),
        pub relation_name: Option<String> => attribute("relation_name"),
        pub alias: Option<String> => attribute("alias"),
        pub startup_cost: Option<f64> => gauge("startup_cost"),
        pub total_cost: Option<f64> => gauge("total_cost"),
        pub plan_rows: Option<i64> => gauge("plan_rows"),
        pub plan_width: Option<i64> => gauge("plan_width"),
        pub rows_removed_by_filter: Option<i64> => gauge("rows_removed_by_filter"),
    }
}
