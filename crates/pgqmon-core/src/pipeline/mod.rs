//! One monitoring pass over a PostgreSQL instance.
//!
//! ```text
//! run ─► enabled? databases? ─► connect ─► version ─► CommonParameters ─► extensions
//!                                                                            │
//!   slow ─► wait ─► blocking ─► individual (seeded by slow) ─► plans (seeded by individual)
//! ```
//!
//! Only the checks before the stages can abort a run. A failing stage is
//! logged, counted in `qp_errors_total` and contributes nothing; later stages
//! still run with whatever their inputs are.

mod blocking;
mod individual;
mod plans;
mod slow;
mod wait;

pub use blocking::populate_blocking_sessions;
pub use individual::{MAX_INDIVIDUAL_QUERY_COUNT, populate_individual_queries};
pub use plans::{is_explainable, populate_execution_plans};
pub use slow::populate_slow_queries;
pub use wait::populate_wait_events;

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::{Captures, Regex};
use tracing::{debug, error, info, warn};

use crate::catalog::{self, BracketEntry, MetricFamily, queries};
use crate::context::Context;
use crate::error::QpmError;
use crate::executor::{Connector, FromRow, QueryExecutor, Row, fetch_all, fetch_one};
use crate::gate::{self, ExtensionRow, ExtensionSet};
use crate::ingest::{MetricIngestor, Record};
use crate::limiter::ExplainRateLimiter;
use crate::params::{self, CommonParameters, MonitoringConfig};
use crate::selfmetrics::{MetricsCollector, SelfMetrics};
use crate::sink::TelemetrySink;

/// Ceiling for a whole run.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(30);
/// Version and extension probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Slow-query, blocking-session and individual-query stages.
pub const STAGE_TIMEOUT: Duration = Duration::from_secs(10);
pub const WAIT_EVENTS_TIMEOUT: Duration = Duration::from_secs(8);
/// Each `EXPLAIN`, including the wait for a limiter token.
pub const EXPLAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-stage emitted record counts of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub version: u32,
    pub slow_queries: usize,
    pub wait_events: usize,
    pub blocking_sessions: usize,
    pub individual_queries: usize,
    pub execution_plan_nodes: usize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Disabled,
    NoDatabases,
    ConnectionFailed(QpmError),
    VersionUnavailable(QpmError),
    UnsupportedVersion(u32),
    ExtensionsUnavailable(QpmError),
    Completed(RunSummary),
}

/// Collaborators shared by every stage of a run.
pub struct StageEnv<'a> {
    pub sink: &'a dyn TelemetrySink,
    pub ingestor: &'a MetricIngestor,
    pub metrics: &'a dyn MetricsCollector,
}

impl StageEnv<'_> {
    fn stage_failed(&self, family: MetricFamily, err: &QpmError) {
        error!(stage = %family, error = %err, "stage failed");
        self.metrics.inc_errors();
    }

    /// Template entry for `family`, or `None` when the stage must be skipped.
    fn prepare(
        &self,
        family: MetricFamily,
        params: &CommonParameters,
        extensions: &ExtensionSet,
    ) -> Option<&'static BracketEntry> {
        match gate::eligible(family, extensions, params.version) {
            Ok(true) => {}
            Ok(false) => {
                debug!(stage = %family, "required extensions not enabled, skipping");
                return None;
            }
            Err(e) => {
                self.stage_failed(family, &e);
                return None;
            }
        }
        if params.databases.is_empty() {
            debug!(stage = %family, "no target databases, skipping");
            return None;
        }
        match catalog::entry_for(family, params.version) {
            Ok(entry) => Some(entry),
            Err(e) => {
                self.stage_failed(family, &e);
                None
            }
        }
    }

    /// Runs one stage query and decodes its rows. Failures are recorded.
    fn fetch<E, R>(
        &self,
        family: MetricFamily,
        executor: &mut E,
        ctx: &Context,
        sql: &str,
    ) -> Option<Vec<R>>
    where
        E: QueryExecutor + ?Sized,
        R: Record + FromRow,
    {
        match fetch_all(executor, ctx, sql) {
            Ok(rows) => {
                self.metrics.inc_queries();
                Some(rows)
            }
            Err(e) => {
                self.stage_failed(family, &e);
                None
            }
        }
    }

    /// Ingests `records` under the family's event type. On failure the
    /// records are dropped and an empty list is returned.
    fn emit<R: Record>(
        &self,
        family: MetricFamily,
        records: Vec<R>,
        params: &CommonParameters,
    ) -> Vec<R> {
        if records.is_empty() {
            debug!(stage = %family, "nothing to ingest");
            return records;
        }
        match self
            .ingestor
            .ingest(&records, family.event_type(), self.sink, params)
        {
            Ok(count) => {
                debug!(stage = %family, count, "ingested");
                records
            }
            Err(e) => {
                self.stage_failed(family, &e);
                Vec::new()
            }
        }
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"));

/// Substitutes `{name}` placeholders in a catalog template.
///
/// Runs a single pass over the template: substituted values are never
/// rescanned. Unknown placeholders are left as is.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        })
        .into_owned()
}

/// Runs the monitoring passes against one instance.
pub struct Pipeline<C: Connector> {
    connector: C,
    sink: Arc<dyn TelemetrySink>,
    ingestor: MetricIngestor,
    limiter: Arc<ExplainRateLimiter>,
    metrics: Arc<dyn MetricsCollector>,
}

impl<C: Connector> Pipeline<C> {
    /// Pipeline using the process-wide limiter and counters and private
    /// ingestion caches.
    pub fn new(connector: C, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            connector,
            sink,
            ingestor: MetricIngestor::new(),
            limiter: ExplainRateLimiter::shared(),
            metrics: SelfMetrics::shared(),
        }
    }

    pub fn with_ingestor(mut self, ingestor: MetricIngestor) -> Self {
        self.ingestor = ingestor;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<ExplainRateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    pub fn ingestor(&self) -> &MetricIngestor {
        &self.ingestor
    }

    /// Runs one pass with a fresh 30 second deadline.
    pub fn run(&self, config: &MonitoringConfig, databases: &[String]) -> RunOutcome {
        self.run_with(&Context::with_timeout(RUN_TIMEOUT), config, databases)
    }

    /// Runs one pass bounded by both `parent` and the run timeout.
    pub fn run_with(
        &self,
        parent: &Context,
        config: &MonitoringConfig,
        databases: &[String],
    ) -> RunOutcome {
        if !config.enabled {
            debug!("query monitoring disabled");
            return RunOutcome::Disabled;
        }
        if databases.is_empty() {
            debug!("no databases to monitor");
            return RunOutcome::NoDatabases;
        }

        let ctx = parent.child(RUN_TIMEOUT);
        let default_db = self.connector.default_database();
        let mut executor = match self.connector.connect(default_db) {
            Ok(exec) => exec,
            Err(e) => {
                error!(database = default_db, error = %e, "connection failed");
                return RunOutcome::ConnectionFailed(e);
            }
        };

        let version = match detect_version(&mut executor, &ctx.child(PROBE_TIMEOUT)) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "cannot detect server version");
                return RunOutcome::VersionUnavailable(e);
            }
        };
        if !catalog::is_supported_version(version) {
            warn!(version, "server version not supported for query monitoring");
            return RunOutcome::UnsupportedVersion(version);
        }

        let params = params::resolve(config, version, params::format_database_list(databases));

        let extensions = match fetch_extensions(&mut executor, &ctx.child(PROBE_TIMEOUT)) {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, "cannot list extensions");
                return RunOutcome::ExtensionsUnavailable(e);
            }
        };
        debug!(version, extensions = extensions.len(), "starting stages");

        let summary = self.run_stages(&mut executor, &ctx, &params, &extensions);
        info!(
            version,
            slow_queries = summary.slow_queries,
            wait_events = summary.wait_events,
            blocking_sessions = summary.blocking_sessions,
            individual_queries = summary.individual_queries,
            execution_plan_nodes = summary.execution_plan_nodes,
            "query monitoring run completed"
        );
        RunOutcome::Completed(summary)
    }

    fn run_stages(
        &self,
        executor: &mut C::Executor,
        ctx: &Context,
        params: &CommonParameters,
        extensions: &ExtensionSet,
    ) -> RunSummary {
        let env = StageEnv {
            sink: self.sink.as_ref(),
            ingestor: &self.ingestor,
            metrics: self.metrics.as_ref(),
        };

        let start = Instant::now();
        let slow = populate_slow_queries(executor, ctx, &env, params, extensions);
        debug!(elapsed = ?start.elapsed(), "slow query stage");

        let start = Instant::now();
        let wait = populate_wait_events(executor, ctx, &env, params, extensions);
        debug!(elapsed = ?start.elapsed(), "wait event stage");

        let start = Instant::now();
        let blocking = populate_blocking_sessions(executor, ctx, &env, params, extensions);
        debug!(elapsed = ?start.elapsed(), "blocking session stage");

        let start = Instant::now();
        let individual =
            populate_individual_queries(executor, ctx, &env, params, extensions, &slow);
        debug!(elapsed = ?start.elapsed(), "individual query stage");

        let start = Instant::now();
        let plan_nodes = populate_execution_plans(
            &self.connector,
            ctx,
            &env,
            &self.limiter,
            params,
            extensions,
            &individual,
        );
        debug!(elapsed = ?start.elapsed(), "execution plan stage");

        RunSummary {
            version: params.version,
            slow_queries: slow.len(),
            wait_events: wait.len(),
            blocking_sessions: blocking.len(),
            individual_queries: individual.len(),
            execution_plan_nodes: plan_nodes.len(),
        }
    }
}

struct ServerVersion(i64);

impl FromRow for ServerVersion {
    fn from_row(row: &Row) -> Result<Self, QpmError> {
        Ok(Self(row.get_i64("server_version_num")?.unwrap_or(0)))
    }
}

/// Reads the server major version.
pub fn detect_version<E>(executor: &mut E, ctx: &Context) -> Result<u32, QpmError>
where
    E: QueryExecutor + ?Sized,
{
    let ServerVersion(num) = fetch_one(executor, ctx, queries::SERVER_VERSION)?
        .ok_or_else(|| QpmError::Query("server_version_num returned no rows".to_string()))?;
    catalog::major_version(num).ok_or_else(|| QpmError::Decode {
        column: "server_version_num".to_string(),
        message: format!("invalid version number {num}"),
    })
}

/// Fetches installed extensions.
pub fn fetch_extensions<E>(executor: &mut E, ctx: &Context) -> Result<ExtensionSet, QpmError>
where
    E: QueryExecutor + ?Sized,
{
    let rows: Vec<ExtensionRow> = fetch_all(executor, ctx, queries::EXTENSIONS)?;
    Ok(rows.into_iter().collect())
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::executor::Row;
    use crate::gate::{ExtensionSet, PG_STAT_MONITOR, PG_STAT_STATEMENTS, PG_WAIT_SAMPLING};
    use crate::params::{CommonParameters, MonitoringConfig, resolve};

    pub fn params(version: u32) -> CommonParameters {
        let config = MonitoringConfig {
            enabled: true,
            host: "db1".into(),
            port: "5432".into(),
            ..MonitoringConfig::default()
        };
        resolve(&config, version, "'app','shop'".into())
    }

    pub fn all_extensions() -> ExtensionSet {
        ExtensionSet::from_pairs([
            (PG_STAT_STATEMENTS, true),
            (PG_WAIT_SAMPLING, true),
            (PG_STAT_MONITOR, true),
        ])
    }

    pub fn slow_row(id: &str, db: &str) -> Row {
        Row::from_pairs([
            ("query_id", Some(id)),
            ("query_text", Some("SELECT * FROM orders WHERE id = $1")),
            ("database_name", Some(db)),
            ("schema_name", Some("public")),
            ("execution_count", Some("10")),
            ("avg_elapsed_time_ms", Some("812.500")),
            ("avg_disk_reads", Some("1.000")),
            ("avg_disk_writes", Some("0.000")),
            ("statement_type", Some("SELECT")),
            ("collection_timestamp", Some("2024-05-01T10:00:00Z")),
        ])
    }

    pub fn individual_row(id: &str, db: &str, text: &str) -> Row {
        Row::from_pairs([
            ("query_text", Some(text)),
            ("query_id", Some(id)),
            ("database_name", Some(db)),
            ("plan_id", Some("77")),
            ("cpu_time_ms", Some("3.5")),
            ("avg_exec_time_ms", Some("640.0")),
        ])
    }

    pub const PLAN_JSON: &str = r#"[{"Plan": {"Node Type": "Seq Scan", "Relation Name": "orders",
        "Startup Cost": 0.0, "Total Cost": 35.5, "Plan Rows": 10, "Plan Width": 8,
        "Plans": [{"Node Type": "Hash", "Plan Rows": 1, "Plan Width": 4}]}}]"#;
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::executor::{MockConnector, Row};
    use crate::gate::{PG_STAT_MONITOR, PG_STAT_STATEMENTS};
    use crate::selfmetrics::{ERRORS_TOTAL, EXEC_PLANS, QUERIES_SCANNED};
    use crate::sink::MemorySink;

    fn config() -> MonitoringConfig {
        MonitoringConfig {
            enabled: true,
            host: "db1".into(),
            port: "5432".into(),
            ..MonitoringConfig::default()
        }
    }

    fn databases() -> Vec<String> {
        vec!["app".to_string(), "shop".to_string()]
    }

    fn connector(version_num: &str, extensions: &[&str]) -> MockConnector {
        let connector = MockConnector::new("postgres");
        connector.respond(
            "server_version_num",
            vec![Row::from_pairs([("server_version_num", Some(version_num))])],
        );
        connector.respond(
            "FROM pg_extension",
            extensions
                .iter()
                .map(|e| Row::from_pairs([("extname", Some(*e)), ("enabled", Some("t"))]))
                .collect(),
        );
        connector
    }

    struct Harness {
        pipeline: Pipeline<MockConnector>,
        sink: Arc<MemorySink>,
        metrics: Arc<SelfMetrics>,
    }

    fn harness(connector: MockConnector) -> Harness {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(SelfMetrics::new());
        let pipeline = Pipeline::new(connector, sink.clone())
            .with_metrics(metrics.clone())
            .with_limiter(Arc::new(ExplainRateLimiter::new()));
        Harness {
            pipeline,
            sink,
            metrics,
        }
    }

    #[test]
    fn disabled_and_empty_runs_stop_before_connecting() {
        let h = harness(connector("130004", &[]));
        let disabled = MonitoringConfig {
            enabled: false,
            ..config()
        };
        assert_eq!(h.pipeline.run(&disabled, &databases()), RunOutcome::Disabled);
        assert_eq!(h.pipeline.run(&config(), &[]), RunOutcome::NoDatabases);
        assert!(h.pipeline.connector().executed().is_empty());
    }

    #[test]
    fn version_13_without_extensions_skips_gated_stages() {
        let h = harness(connector("130004", &[]));
        let outcome = h.pipeline.run(&config(), &databases());

        assert_eq!(
            outcome,
            RunOutcome::Completed(RunSummary {
                version: 13,
                ..RunSummary::default()
            })
        );
        let c = h.pipeline.connector();
        assert_eq!(c.count_matching("pg_blocking_pids"), 0);
        assert_eq!(c.count_matching("pg_wait_sampling_history"), 0);
        assert_eq!(c.count_matching("avg_disk_reads"), 0);
        assert_eq!(c.count_matching("FROM pg_stat_monitor"), 0);
        assert_eq!(h.metrics.snapshot()[ERRORS_TOTAL], 0);
        assert_eq!(h.sink.published_len(), 0);
    }

    #[test]
    fn version_10_aborts_before_any_stage() {
        let h = harness(connector("100021", &[PG_STAT_STATEMENTS]));
        let outcome = h.pipeline.run(&config(), &databases());

        assert_eq!(outcome, RunOutcome::UnsupportedVersion(10));
        assert_eq!(h.pipeline.connector().executed().len(), 1);
        assert_eq!(h.sink.published_len(), 0);
        assert_eq!(h.metrics.snapshot()[QUERIES_SCANNED], 0);
    }

    #[test]
    fn unreachable_server_fails_the_run() {
        let h = harness(connector("140000", &[]).unreachable("postgres"));
        assert!(matches!(
            h.pipeline.run(&config(), &databases()),
            RunOutcome::ConnectionFailed(QpmError::Connection(_))
        ));
    }

    #[test]
    fn version_probe_failure_fails_the_run() {
        let c = MockConnector::new("postgres");
        c.fail("server_version_num", QpmError::Query("permission denied".into()));
        let h = harness(c);
        assert!(matches!(
            h.pipeline.run(&config(), &databases()),
            RunOutcome::VersionUnavailable(_)
        ));
    }

    #[test]
    fn extension_probe_failure_fails_the_run() {
        let c = MockConnector::new("postgres");
        c.respond(
            "server_version_num",
            vec![Row::from_pairs([("server_version_num", Some("150002"))])],
        );
        c.fail("FROM pg_extension", QpmError::Query("timeout".into()));
        let h = harness(c);
        assert!(matches!(
            h.pipeline.run(&config(), &databases()),
            RunOutcome::ExtensionsUnavailable(_)
        ));
        assert_eq!(h.pipeline.connector().count_matching("avg_disk_reads"), 0);
    }

    #[test]
    fn full_run_emits_every_family() {
        let c = connector(
            "140005",
            &[PG_STAT_STATEMENTS, "pg_wait_sampling", PG_STAT_MONITOR],
        );
        c.respond("avg_disk_reads", vec![slow_row("101", "app")]);
        c.respond(
            "pg_wait_sampling_history",
            vec![Row::from_pairs([
                ("wait_event_name", Some("Lock:relation")),
                ("wait_category", Some("Locks")),
                ("total_wait_time_ms", Some("120.0")),
                ("query_id", Some("101")),
                ("database_name", Some("app")),
            ])],
        );
        c.respond(
            "pg_blocking_pids",
            vec![Row::from_pairs([
                ("blocked_pid", Some("4242")),
                ("blocked_query", Some("UPDATE t SET a = ? WHERE id = ?")),
                ("blocking_pid", Some("4243")),
                ("database_name", Some("app")),
            ])],
        );
        c.respond(
            "FROM pg_stat_monitor",
            vec![individual_row(
                "101",
                "app",
                "SELECT * FROM orders WHERE customer = 'bob'",
            )],
        );
        c.respond_in(
            "app",
            "EXPLAIN (FORMAT JSON)",
            vec![Row::from_pairs([("QUERY PLAN", Some(PLAN_JSON))])],
        );
        let h = harness(c);

        let outcome = h.pipeline.run(&config(), &databases());
        assert_eq!(
            outcome,
            RunOutcome::Completed(RunSummary {
                version: 14,
                slow_queries: 1,
                wait_events: 1,
                blocking_sessions: 1,
                individual_queries: 1,
                execution_plan_nodes: 2,
            })
        );

        for event in [
            "PostgresSlowQueries",
            "PostgresWaitEvents",
            "PostgresBlockingSessions",
            "PostgresIndividualQueries",
        ] {
            assert_eq!(h.sink.sets_for(event).len(), 1, "{event}");
        }
        assert_eq!(h.sink.sets_for("PostgresExecutionPlanMetrics").len(), 2);

        let explains: Vec<_> = h
            .pipeline
            .connector()
            .executed()
            .into_iter()
            .filter(|(_, sql)| sql.contains("EXPLAIN (FORMAT JSON)"))
            .collect();
        assert_eq!(explains.len(), 1);
        assert_eq!(explains[0].0, "app");
        assert!(explains[0].1.ends_with("customer = 'bob'"));

        let snap = h.metrics.snapshot();
        assert_eq!(snap[ERRORS_TOTAL], 0);
        assert_eq!(snap[EXEC_PLANS], 1);
        assert_eq!(snap[QUERIES_SCANNED], 4);
    }

    #[test]
    fn failing_stage_does_not_stop_later_stages() {
        let c = connector("140005", &[PG_STAT_STATEMENTS, "pg_wait_sampling"]);
        c.fail("avg_disk_reads", QpmError::Query("relation does not exist".into()));
        c.respond(
            "pg_wait_sampling_history",
            vec![Row::from_pairs([("wait_event_name", Some("IO:DataFileRead"))])],
        );
        let h = harness(c);

        let outcome = h.pipeline.run(&config(), &databases());
        let RunOutcome::Completed(summary) = &outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(summary.slow_queries, 0);
        assert_eq!(summary.wait_events, 1);
        assert_eq!(h.metrics.snapshot()[ERRORS_TOTAL], 1);
        assert_eq!(h.pipeline.connector().count_matching("pg_blocking_pids"), 1);
    }

    #[test]
    fn publish_failure_empties_stage_output() {
        let c = connector("140005", &[PG_STAT_STATEMENTS]);
        c.respond("avg_disk_reads", vec![slow_row("1", "app")]);
        let sink = Arc::new(MemorySink::new());
        sink.fail_publishes("connection reset");
        let metrics = Arc::new(SelfMetrics::new());
        let pipeline = Pipeline::new(c, sink)
            .with_metrics(metrics.clone())
            .with_limiter(Arc::new(ExplainRateLimiter::new()));

        let RunOutcome::Completed(summary) = pipeline.run(&config(), &databases()) else {
            panic!("run did not complete");
        };
        assert_eq!(summary.slow_queries, 0);
        assert_eq!(metrics.snapshot()[ERRORS_TOTAL], 1);
    }

    #[test]
    fn render_substitutes_named_placeholders() {
        let sql = render_template(
            "SELECT 1 WHERE d IN ({databases}) LIMIT {count}",
            &[("databases", "'a','b'"), ("count", "20")],
        );
        assert_eq!(sql, "SELECT 1 WHERE d IN ('a','b') LIMIT 20");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let sql = render_template(
            "WHERE d IN ({databases}) LIMIT {count} /* {other} */",
            &[("databases", "'x{count}'"), ("count", "20")],
        );
        assert_eq!(sql, "WHERE d IN ('x{count}') LIMIT 20 /* {other} */");
    }

    #[test]
    fn version_detection_parses_version_num() {
        let mut exec = crate::executor::MockExecutor::new("postgres");
        exec.respond(
            "server_version_num",
            vec![Row::from_pairs([("server_version_num", Some("160003"))])],
        );
        let ctx = Context::with_timeout(PROBE_TIMEOUT);
        assert_eq!(detect_version(&mut exec, &ctx), Ok(16));

        let mut empty = crate::executor::MockExecutor::new("postgres");
        assert!(detect_version(&mut empty, &ctx).is_err());
    }
}
