//! Run configuration and its validated, frozen form.

use tracing::warn;

/// Upper bound for the per-stage row count threshold.
pub const MAX_QUERY_COUNT_THRESHOLD: i64 = 30;
/// Count threshold used when the configured one is negative.
pub const DEFAULT_QUERY_COUNT_THRESHOLD: i64 = 20;
/// Response-time threshold (ms) used when the configured one is negative.
pub const DEFAULT_RESPONSE_TIME_THRESHOLD: i64 = 500;

/// Monitoring settings as supplied by the host process.
///
/// Thresholds are signed on purpose: out-of-range values are corrected by
/// [`resolve`] rather than rejected at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub count_threshold: i64,
    pub response_time_threshold: i64,
    pub host: String,
    pub port: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            count_threshold: DEFAULT_QUERY_COUNT_THRESHOLD,
            response_time_threshold: DEFAULT_RESPONSE_TIME_THRESHOLD,
            host: "localhost".to_string(),
            port: "5432".to_string(),
        }
    }
}

/// Parameters shared by every stage of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonParameters {
    /// Detected server major version.
    pub version: u32,
    /// Target databases as a quoted, comma-separated SQL list: `'a','b'`.
    pub databases: String,
    pub count_threshold: i64,
    /// Milliseconds.
    pub response_time_threshold: i64,
    pub host: String,
    pub port: String,
}

impl CommonParameters {
    /// Identity of the monitored instance, `host:port`.
    pub fn instance_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Validates `config` and freezes it together with the detected version and
/// the pre-formatted database list. Never fails.
pub fn resolve(config: &MonitoringConfig, version: u32, databases: String) -> CommonParameters {
    CommonParameters {
        version,
        databases,
        count_threshold: validate_count(config.count_threshold),
        response_time_threshold: validate_response_time(config.response_time_threshold),
        host: config.host.clone(),
        port: config.port.clone(),
    }
}

fn validate_count(count: i64) -> i64 {
    if count < 0 {
        warn!(
            count,
            default = DEFAULT_QUERY_COUNT_THRESHOLD,
            "invalid query count threshold, using default"
        );
        return DEFAULT_QUERY_COUNT_THRESHOLD;
    }
    if count > MAX_QUERY_COUNT_THRESHOLD {
        warn!(
            count,
            max = MAX_QUERY_COUNT_THRESHOLD,
            "query count threshold exceeds maximum, clamping"
        );
        return MAX_QUERY_COUNT_THRESHOLD;
    }
    count
}

fn validate_response_time(ms: i64) -> i64 {
    if ms < 0 {
        warn!(
            response_time_ms = ms,
            default = DEFAULT_RESPONSE_TIME_THRESHOLD,
            "invalid response time threshold, using default"
        );
        return DEFAULT_RESPONSE_TIME_THRESHOLD;
    }
    ms
}

/// Formats database names as a SQL `IN (...)` list body.
///
/// Names are sorted for stable query text and embedded single quotes are
/// doubled. An empty input yields an empty string.
pub fn format_database_list<S: AsRef<str>>(names: &[S]) -> String {
    let mut quoted: Vec<String> = names
        .iter()
        .map(|n| format!("'{}'", n.as_ref().replace('\'', "''")))
        .collect();
    quoted.sort();
    quoted.dedup();
    quoted.join(",")
}
