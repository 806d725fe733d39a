//! SQL templates for the monitored statistics views.
//!
//! Substitution points: `{databases}` (quoted list), `{count}` (row limit),
//! and for individual queries also `{query_ids}` and `{response_time}`.
//! Every statement starts with [`QUERY_TAG`] so the collector's own traffic
//! can be filtered out of `pg_stat_statements` / `pg_stat_monitor`.

/// Leading comment on every statement issued by the pipeline.
pub const QUERY_TAG: &str = "/* pgqmon */";

/// pg_stat_statements on PostgreSQL 12 (`total_time` naming).
pub(super) const SLOW_QUERIES_V12: &str = r#"/* pgqmon */
    SELECT
        pss.queryid::text AS query_id,
        LEFT(pss.query, 4095) AS query_text,
        pd.datname AS database_name,
        current_schema() AS schema_name,
        pss.calls AS execution_count,
        ROUND((pss.total_time / NULLIF(pss.calls, 0))::numeric, 3) AS avg_elapsed_time_ms,
        ROUND((pss.shared_blks_read::numeric / NULLIF(pss.calls, 0)), 3) AS avg_disk_reads,
        ROUND((pss.shared_blks_written::numeric / NULLIF(pss.calls, 0)), 3) AS avg_disk_writes,
        CASE
            WHEN pss.query ILIKE 'SELECT%' THEN 'SELECT'
            WHEN pss.query ILIKE 'INSERT%' THEN 'INSERT'
            WHEN pss.query ILIKE 'UPDATE%' THEN 'UPDATE'
            WHEN pss.query ILIKE 'DELETE%' THEN 'DELETE'
            ELSE 'OTHER'
        END AS statement_type,
        to_char(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS collection_timestamp
    FROM pg_stat_statements pss
    JOIN pg_database pd ON pss.dbid = pd.oid
    WHERE pd.datname IN ({databases})
      AND pss.query NOT LIKE '/* pgqmon */%'
      AND pss.query NOT ILIKE 'EXPLAIN%'
    ORDER BY avg_elapsed_time_ms DESC NULLS LAST
    LIMIT {count}
"#;

/// pg_stat_statements on PostgreSQL 13+ (`total_exec_time` naming).
pub(super) const SLOW_QUERIES_V13_AND_ABOVE: &str = r#"/* pgqmon */
    SELECT
        pss.queryid::text AS query_id,
        LEFT(pss.query, 4095) AS query_text,
        pd.datname AS database_name,
        current_schema() AS schema_name,
        pss.calls AS execution_count,
        ROUND((pss.total_exec_time / NULLIF(pss.calls, 0))::numeric, 3) AS avg_elapsed_time_ms,
        ROUND((pss.shared_blks_read::numeric / NULLIF(pss.calls, 0)), 3) AS avg_disk_reads,
        ROUND((pss.shared_blks_written::numeric / NULLIF(pss.calls, 0)), 3) AS avg_disk_writes,
        CASE
            WHEN pss.query ILIKE 'SELECT%' THEN 'SELECT'
            WHEN pss.query ILIKE 'INSERT%' THEN 'INSERT'
            WHEN pss.query ILIKE 'UPDATE%' THEN 'UPDATE'
            WHEN pss.query ILIKE 'DELETE%' THEN 'DELETE'
            ELSE 'OTHER'
        END AS statement_type,
        to_char(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS collection_timestamp
    FROM pg_stat_statements pss
    JOIN pg_database pd ON pss.dbid = pd.oid
    WHERE pd.datname IN ({databases})
      AND pss.query NOT LIKE '/* pgqmon */%'
      AND pss.query NOT ILIKE 'EXPLAIN%'
    ORDER BY avg_elapsed_time_ms DESC NULLS LAST
    LIMIT {count}
"#;

/// pg_wait_sampling history joined with pg_stat_statements. Version independent.
pub(super) const WAIT_EVENTS: &str = r#"/* pgqmon */
    WITH wait_history AS (
        SELECT wh.pid, wh.event_type, wh.event, wh.ts, wh.queryid
        FROM pg_wait_sampling_history wh
        WHERE wh.queryid IS NOT NULL
          AND wh.event IS NOT NULL
    ),
    wait_totals AS (
        SELECT
            wh.event_type || ':' || wh.event AS wait_event_name,
            CASE
                WHEN wh.event_type IN ('LWLock', 'Lock') THEN 'Locks'
                WHEN wh.event_type = 'IO' THEN 'Disk IO'
                WHEN wh.event_type = 'CPU' THEN 'CPU'
                ELSE 'Other'
            END AS wait_category,
            EXTRACT(EPOCH FROM (MAX(wh.ts) - MIN(wh.ts))) * 1000 AS total_wait_time_ms,
            wh.queryid
        FROM wait_history wh
        GROUP BY wh.event_type, wh.event, wh.queryid
    )
    SELECT
        wt.wait_event_name,
        wt.wait_category,
        ROUND(wt.total_wait_time_ms::numeric, 3) AS total_wait_time_ms,
        to_char(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS collection_timestamp,
        wt.queryid::text AS query_id,
        LEFT(pss.query, 4095) AS query_text,
        pd.datname AS database_name
    FROM wait_totals wt
    JOIN pg_stat_statements pss ON wt.queryid = pss.queryid
    JOIN pg_database pd ON pd.oid = pss.dbid
    WHERE pd.datname IN ({databases})
      AND pss.query NOT LIKE '/* pgqmon */%'
    ORDER BY wt.total_wait_time_ms DESC
    LIMIT {count}
"#;

/// Blocking chains on 12/13. `pg_stat_activity.query_id` does not exist yet,
/// so ids come from pg_stat_statements by text and the raw text is returned.
pub(super) const BLOCKING_SESSIONS_V12_AND_V13: &str = r#"/* pgqmon */
    SELECT
        blocked_activity.pid AS blocked_pid,
        LEFT(blocked_activity.query, 4095) AS blocked_query,
        blocked_statements.queryid::text AS blocked_query_id,
        blocked_activity.query_start::text AS blocked_query_start,
        blocked_activity.datname AS database_name,
        blocking_activity.pid AS blocking_pid,
        LEFT(blocking_activity.query, 4095) AS blocking_query,
        blocking_statements.queryid::text AS blocking_query_id,
        blocking_activity.query_start::text AS blocking_query_start
    FROM pg_stat_activity AS blocked_activity
    JOIN LATERAL unnest(pg_blocking_pids(blocked_activity.pid)) AS blocking(pid) ON TRUE
    JOIN pg_stat_activity AS blocking_activity ON blocking_activity.pid = blocking.pid
    LEFT JOIN pg_stat_statements AS blocked_statements
        ON blocked_statements.query = blocked_activity.query
       AND blocked_statements.dbid = blocked_activity.datid
    LEFT JOIN pg_stat_statements AS blocking_statements
        ON blocking_statements.query = blocking_activity.query
       AND blocking_statements.dbid = blocking_activity.datid
    WHERE blocked_activity.datname IN ({databases})
      AND blocked_activity.query NOT LIKE '/* pgqmon */%'
    ORDER BY blocked_activity.query_start ASC
    LIMIT {count}
"#;

/// Blocking chains on 14+: native `query_id`, literals stripped server-side.
pub(super) const BLOCKING_SESSIONS_V14_AND_ABOVE: &str = r#"/* pgqmon */
    SELECT
        blocked_activity.pid AS blocked_pid,
        regexp_replace(LEFT(blocked_activity.query, 4095), '''[^'']*''|\d+|".*?"', '?', 'g') AS blocked_query,
        blocked_activity.query_id::text AS blocked_query_id,
        blocked_activity.query_start::text AS blocked_query_start,
        blocked_activity.datname AS database_name,
        blocking_activity.pid AS blocking_pid,
        regexp_replace(LEFT(blocking_activity.query, 4095), '''[^'']*''|\d+|".*?"', '?', 'g') AS blocking_query,
        blocking_activity.query_id::text AS blocking_query_id,
        blocking_activity.query_start::text AS blocking_query_start
    FROM pg_stat_activity AS blocked_activity
    JOIN LATERAL unnest(pg_blocking_pids(blocked_activity.pid)) AS blocking(pid) ON TRUE
    JOIN pg_stat_activity AS blocking_activity ON blocking_activity.pid = blocking.pid
    WHERE blocked_activity.datname IN ({databases})
      AND blocked_activity.query NOT LIKE '/* pgqmon */%'
    ORDER BY blocked_activity.query_start ASC
    LIMIT {count}
"#;

/// pg_stat_monitor samples on 12 (`total_time`, no plan ids).
pub(super) const INDIVIDUAL_QUERIES_V12: &str = r#"/* pgqmon */
    SELECT
        query AS query_text,
        queryid::text AS query_id,
        datname AS database_name,
        NULL::text AS plan_id,
        ROUND(((cpu_user_time + cpu_sys_time) / NULLIF(calls, 0))::numeric, 3) AS cpu_time_ms,
        ROUND((total_time / NULLIF(calls, 0))::numeric, 3) AS avg_exec_time_ms
    FROM pg_stat_monitor
    WHERE queryid IN ({query_ids})
      AND datname IN ({databases})
      AND (total_time / NULLIF(calls, 0)) > {response_time}
      AND query NOT LIKE '/* pgqmon */%'
    ORDER BY avg_exec_time_ms DESC NULLS LAST
    LIMIT {count}
"#;

/// pg_stat_monitor samples on 13+.
pub(super) const INDIVIDUAL_QUERIES_V13_AND_ABOVE: &str = r#"/* pgqmon */
    SELECT
        query AS query_text,
        queryid::text AS query_id,
        datname AS database_name,
        planid::text AS plan_id,
        ROUND(((cpu_user_time + cpu_sys_time) / NULLIF(calls, 0))::numeric, 3) AS cpu_time_ms,
        ROUND((total_exec_time / NULLIF(calls, 0))::numeric, 3) AS avg_exec_time_ms
    FROM pg_stat_monitor
    WHERE queryid IN ({query_ids})
      AND datname IN ({databases})
      AND (total_exec_time / NULLIF(calls, 0)) > {response_time}
      AND query NOT LIKE '/* pgqmon */%'
    ORDER BY avg_exec_time_ms DESC NULLS LAST
    LIMIT {count}
"#;

/// Prefix for plan capture; the statement text is appended verbatim.
pub(super) const EXPLAIN_PREFIX: &str = "/* pgqmon */ EXPLAIN (FORMAT JSON) ";

/// Server major version. `server_version_num` is e.g. `140005`.
pub const SERVER_VERSION: &str = "SHOW server_version_num";

/// Installed extensions.
pub const EXTENSIONS: &str = "/* pgqmon */ SELECT extname, TRUE AS enabled FROM pg_extension";

/// Connectable, non-template databases.
pub const DATABASES: &str = "/* pgqmon */ SELECT datname FROM pg_database \
     WHERE NOT datistemplate AND datallowconn \
     ORDER BY datname";
