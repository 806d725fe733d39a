//! pgqmond - PostgreSQL query-performance monitoring daemon.
//!
//! Runs the monitoring pipeline on an interval and writes one JSON payload
//! per published batch to stdout or a file.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgqmon_core::context::Context;
use pgqmon_core::executor::PostgresConnector;
use pgqmon_core::params::MonitoringConfig;
use pgqmon_core::pipeline::{PROBE_TIMEOUT, Pipeline, RUN_TIMEOUT, RunOutcome};
use pgqmon_core::sink::{JsonSink, TelemetrySink};

/// PostgreSQL query-performance monitoring daemon.
#[derive(Parser, Debug)]
#[command(
    name = "pgqmond",
    about = "PostgreSQL query-performance monitoring daemon",
    version
)]
struct Args {
    /// Seconds between monitoring runs.
    #[arg(short, long, env = "PGQMON_INTERVAL", default_value = "60")]
    interval: u64,

    /// Enable query monitoring. Disable with --enable-query-monitoring=false.
    #[arg(
        long,
        env = "ENABLE_QUERY_MONITORING",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    enable_query_monitoring: bool,

    /// Rows fetched per metric family. Negative values fall back to 20,
    /// values above 30 are clamped.
    #[arg(
        long,
        env = "QUERY_MONITORING_COUNT_THRESHOLD",
        default_value = "20",
        allow_negative_numbers = true
    )]
    count_threshold: i64,

    /// Minimum average execution time (ms) of sampled queries.
    #[arg(
        long,
        env = "QUERY_MONITORING_RESPONSE_TIME_THRESHOLD",
        default_value = "500",
        allow_negative_numbers = true
    )]
    response_time_threshold: i64,

    /// Databases to monitor (comma separated). Discovered from pg_database
    /// when empty.
    #[arg(short, long, env = "PGQMON_DATABASES", value_delimiter = ',')]
    databases: Vec<String>,

    /// Append payloads to this file instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Run a single pass and exit.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn monitoring_config(&self, host: &str, port: &str) -> MonitoringConfig {
        MonitoringConfig {
            enabled: self.enable_query_monitoring,
            count_threshold: self.count_threshold,
            response_time_threshold: self.response_time_threshold,
            host: host.to_string(),
            port: port.to_string(),
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgqmond", "pgqmon_core"] {
        match format!("{target}={level}").parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {target}: {e}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn open_sink(output: Option<&PathBuf>) -> Result<Arc<dyn TelemetrySink>, String> {
    match output {
        Some(path) => JsonSink::create(path)
            .map(|s| Arc::new(s) as Arc<dyn TelemetrySink>)
            .map_err(|e| e.to_string()),
        None => Ok(Arc::new(JsonSink::stdout())),
    }
}

fn target_databases(args: &Args, connector: &PostgresConnector) -> Vec<String> {
    if !args.databases.is_empty() {
        return args.databases.clone();
    }
    match connector.list_databases(&Context::with_timeout(PROBE_TIMEOUT)) {
        Ok(dbs) => {
            debug!("Discovered databases: {}", dbs.join(", "));
            dbs
        }
        Err(e) => {
            warn!("Database discovery failed: {}", e);
            Vec::new()
        }
    }
}

fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(summary) => debug!("Run completed: {:?}", summary),
        RunOutcome::Disabled => info!("Query monitoring is disabled"),
        RunOutcome::NoDatabases => warn!("No databases to monitor"),
        RunOutcome::UnsupportedVersion(v) => {
            warn!("PostgreSQL {} is not supported (12 or newer required)", v)
        }
        RunOutcome::ConnectionFailed(e)
        | RunOutcome::VersionUnavailable(e)
        | RunOutcome::ExtensionsUnavailable(e) => error!("Run aborted: {}", e),
    }
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("pgqmond {} starting", env!("CARGO_PKG_VERSION"));

    let connector = match PostgresConnector::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let sink = match open_sink(args.output.as_ref()) {
        Ok(s) => s,
        Err(e) => {
            error!("Cannot open output: {}", e);
            std::process::exit(1);
        }
    };

    let config = args.monitoring_config(connector.host(), connector.port());
    info!(
        "Config: interval={}s, target={}:{}, count_threshold={}, response_time_threshold={}ms",
        args.interval,
        config.host,
        config.port,
        config.count_threshold,
        config.response_time_threshold
    );

    let pipeline = Pipeline::new(connector, sink);
    let interval = Duration::from_secs(args.interval);

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let current: Arc<Mutex<Option<Context>>> = Arc::new(Mutex::new(None));
    let r = running.clone();
    let c = current.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
        if let Some(ctx) = c.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            ctx.cancel();
        }
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    while running.load(Ordering::SeqCst) {
        let databases = target_databases(&args, pipeline.connector());

        let ctx = Context::with_timeout(RUN_TIMEOUT);
        *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(ctx.clone());
        let outcome = pipeline.run_with(&ctx, &config, &databases);
        *current.lock().unwrap_or_else(PoisonError::into_inner) = None;

        log_outcome(&outcome);
        let snapshot = pipeline.metrics().snapshot();
        info!(
            "Self metrics: {}",
            snapshot
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if args.once {
            break;
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutdown complete");
}
