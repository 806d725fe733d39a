//! Version-aware SQL template selection.
//!
//! [`BRACKETS`] is the single source of truth mapping a metric family and a
//! server major version to its SQL template. Entries are checked in order and
//! are disjoint per family, so at most one entry matches.

pub mod queries;

use std::fmt;

use crate::error::QpmError;

/// Oldest server major version the pipeline can monitor.
pub const MIN_SUPPORTED_VERSION: u32 = 12;

/// The five telemetry families produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricFamily {
    SlowQueries,
    WaitEvents,
    BlockingSessions,
    IndividualQueries,
    ExecutionPlans,
}

impl MetricFamily {
    /// Telemetry event type for this family.
    pub fn event_type(self) -> &'static str {
        match self {
            MetricFamily::SlowQueries => "PostgresSlowQueries",
            MetricFamily::WaitEvents => "PostgresWaitEvents",
            MetricFamily::BlockingSessions => "PostgresBlockingSessions",
            MetricFamily::IndividualQueries => "PostgresIndividualQueries",
            MetricFamily::ExecutionPlans => "PostgresExecutionPlanMetrics",
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricFamily::SlowQueries => "slow_queries",
            MetricFamily::WaitEvents => "wait_events",
            MetricFamily::BlockingSessions => "blocking_sessions",
            MetricFamily::IndividualQueries => "individual_queries",
            MetricFamily::ExecutionPlans => "execution_plans",
        };
        f.write_str(name)
    }
}

/// A range of server major versions sharing one query dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBracket {
    Exactly(u32),
    /// Either of two exact versions.
    OneOf(u32, u32),
    AtLeast(u32),
    /// Every supported version.
    Any,
}

impl VersionBracket {
    pub fn contains(self, version: u32) -> bool {
        match self {
            VersionBracket::Exactly(v) => version == v,
            VersionBracket::OneOf(a, b) => version == a || version == b,
            VersionBracket::AtLeast(v) => version >= v,
            VersionBracket::Any => version >= MIN_SUPPORTED_VERSION,
        }
    }
}

/// One row of the dispatch table.
#[derive(Debug, Clone, Copy)]
pub struct BracketEntry {
    pub family: MetricFamily,
    pub bracket: VersionBracket,
    pub template: &'static str,
    /// True when the template strips literals from query text itself.
    pub anonymized_server_side: bool,
}

pub const BRACKETS: &[BracketEntry] = &[
    BracketEntry {
        family: MetricFamily::SlowQueries,
        bracket: VersionBracket::Exactly(12),
        template: queries::SLOW_QUERIES_V12,
        anonymized_server_side: true,
    },
    BracketEntry {
        family: MetricFamily::SlowQueries,
        bracket: VersionBracket::AtLeast(13),
        template: queries::SLOW_QUERIES_V13_AND_ABOVE,
        anonymized_server_side: true,
    },
    BracketEntry {
        family: MetricFamily::WaitEvents,
        bracket: VersionBracket::Any,
        template: queries::WAIT_EVENTS,
        anonymized_server_side: true,
    },
    BracketEntry {
        family: MetricFamily::BlockingSessions,
        bracket: VersionBracket::OneOf(12, 13),
        template: queries::BLOCKING_SESSIONS_V12_AND_V13,
        anonymized_server_side: false,
    },
    BracketEntry {
        family: MetricFamily::BlockingSessions,
        bracket: VersionBracket::AtLeast(14),
        template: queries::BLOCKING_SESSIONS_V14_AND_ABOVE,
        anonymized_server_side: true,
    },
    BracketEntry {
        family: MetricFamily::IndividualQueries,
        bracket: VersionBracket::Exactly(12),
        template: queries::INDIVIDUAL_QUERIES_V12,
        anonymized_server_side: false,
    },
    BracketEntry {
        family: MetricFamily::IndividualQueries,
        bracket: VersionBracket::AtLeast(13),
        template: queries::INDIVIDUAL_QUERIES_V13_AND_ABOVE,
        anonymized_server_side: false,
    },
    BracketEntry {
        family: MetricFamily::ExecutionPlans,
        bracket: VersionBracket::Any,
        template: queries::EXPLAIN_PREFIX,
        anonymized_server_side: false,
    },
];

/// Returns the bracket entry for `family` on server major `version`.
pub fn entry_for(family: MetricFamily, version: u32) -> Result<&'static BracketEntry, QpmError> {
    BRACKETS
        .iter()
        .find(|e| e.family == family && e.bracket.contains(version))
        .ok_or(QpmError::UnsupportedVersion(version))
}

/// Returns the SQL template for `family` on server major `version`.
///
/// The template is returned unformatted; callers substitute the database
/// list and thresholds right before execution.
pub fn template_for(family: MetricFamily, version: u32) -> Result<&'static str, QpmError> {
    entry_for(family, version).map(|e| e.template)
}

/// Whether the template for `family` already anonymizes query text.
/// Stages anonymize client-side when this is false.
pub fn anonymized_server_side(family: MetricFamily, version: u32) -> Result<bool, QpmError> {
    entry_for(family, version).map(|e| e.anonymized_server_side)
}

/// Returns true if query monitoring supports this server major version.
pub fn is_supported_version(version: u32) -> bool {
    version >= MIN_SUPPORTED_VERSION
}

/// Converts `server_version_num` (e.g. `130004`) to a major version.
pub fn major_version(server_version_num: i64) -> Option<u32> {
    if server_version_num <= 0 {
        return None;
    }
    u32::try_from(server_version_num / 10_000).ok()
}
