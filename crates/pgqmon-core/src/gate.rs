//! Extension-based eligibility of metric families.

use std::collections::HashMap;

use crate::catalog::{self, MetricFamily};
use crate::error::QpmError;
use crate::executor::{FromRow, Row};

pub const PG_STAT_STATEMENTS: &str = "pg_stat_statements";
pub const PG_WAIT_SAMPLING: &str = "pg_wait_sampling";
pub const PG_STAT_MONITOR: &str = "pg_stat_monitor";

/// Installed extensions of the monitored server, fetched once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionSet {
    enabled: HashMap<String, bool>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `(name, enabled)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        Self {
            enabled: pairs.into_iter().map(|(n, e)| (n.into(), e)).collect(),
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

/// One `pg_extension` row.
#[derive(Debug)]
pub(crate) struct ExtensionRow {
    pub name: String,
    pub enabled: bool,
}

impl FromRow for ExtensionRow {
    fn from_row(row: &Row) -> Result<Self, QpmError> {
        let name = row.get_str("extname")?.ok_or_else(|| QpmError::Decode {
            column: "extname".to_string(),
            message: "extension name is NULL".to_string(),
        })?;
        let enabled = row.get_bool("enabled")?.unwrap_or(false);
        Ok(Self {
            name: name.to_string(),
            enabled,
        })
    }
}

impl FromIterator<ExtensionRow> for ExtensionSet {
    fn from_iter<T: IntoIterator<Item = ExtensionRow>>(iter: T) -> Self {
        Self::from_pairs(iter.into_iter().map(|r| (r.name, r.enabled)))
    }
}

/// Whether `family` can be collected given the installed extensions.
///
/// `Ok(false)` means "skip silently". An error means the predicate itself
/// cannot be evaluated, e.g. the version falls outside every query bracket.
pub fn eligible(
    family: MetricFamily,
    extensions: &ExtensionSet,
    version: u32,
) -> Result<bool, QpmError> {
    if !catalog::is_supported_version(version) {
        return Err(QpmError::UnsupportedVersion(version));
    }
    let ok = match family {
        MetricFamily::SlowQueries => extensions.is_enabled(PG_STAT_STATEMENTS),
        MetricFamily::WaitEvents => {
            extensions.is_enabled(PG_WAIT_SAMPLING) && extensions.is_enabled(PG_STAT_STATEMENTS)
        }
        // 12 and 13 resolve query ids through pg_stat_statements.
        MetricFamily::BlockingSessions => match version {
            12 | 13 => extensions.is_enabled(PG_STAT_STATEMENTS),
            _ => true,
        },
        MetricFamily::IndividualQueries | MetricFamily::ExecutionPlans => {
            extensions.is_enabled(PG_STAT_MONITOR)
        }
    };
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> ExtensionSet {
        ExtensionSet::from_pairs([
            (PG_STAT_STATEMENTS, true),
            (PG_WAIT_SAMPLING, true),
            (PG_STAT_MONITOR, true),
        ])
    }

    #[test]
    fn empty_set_disables_extension_backed_families() {
        let none = ExtensionSet::new();
        for family in [
            MetricFamily::SlowQueries,
            MetricFamily::WaitEvents,
            MetricFamily::IndividualQueries,
            MetricFamily::ExecutionPlans,
        ] {
            assert_eq!(eligible(family, &none, 13), Ok(false), "{family}");
        }
        assert_eq!(eligible(MetricFamily::BlockingSessions, &none, 13), Ok(false));
        assert_eq!(eligible(MetricFamily::BlockingSessions, &none, 14), Ok(true));
    }

    #[test]
    fn everything_eligible_with_all_extensions() {
        for v in [12, 13, 14, 17] {
            for family in [
                MetricFamily::SlowQueries,
                MetricFamily::WaitEvents,
                MetricFamily::BlockingSessions,
                MetricFamily::IndividualQueries,
                MetricFamily::ExecutionPlans,
            ] {
                assert_eq!(eligible(family, &all(), v), Ok(true));
            }
        }
    }

    #[test]
    fn wait_events_need_both_extensions() {
        let only_sampling = ExtensionSet::from_pairs([(PG_WAIT_SAMPLING, true)]);
        assert_eq!(eligible(MetricFamily::WaitEvents, &only_sampling, 15), Ok(false));
    }

    #[test]
    fn disabled_extension_counts_as_missing() {
        let disabled = ExtensionSet::from_pairs([(PG_STAT_STATEMENTS, false)]);
        assert_eq!(eligible(MetricFamily::SlowQueries, &disabled, 15), Ok(false));
    }

    #[test]
    fn unsupported_version_cannot_be_evaluated() {
        assert_eq!(
            eligible(MetricFamily::SlowQueries, &all(), 11),
            Err(QpmError::UnsupportedVersion(11))
        );
    }

    #[test]
    fn extension_rows_decode() {
        let row = Row::from_pairs([("extname", Some("pg_stat_statements")), ("enabled", Some("t"))]);
        let set: ExtensionSet = [ExtensionRow::from_row(&row).unwrap()].into_iter().collect();
        assert!(set.is_enabled(PG_STAT_STATEMENTS));
        assert_eq!(set.len(), 1);

        let bad = Row::from_pairs([("extname", None), ("enabled", Some("t"))]);
        assert!(ExtensionRow::from_row(&bad).is_err());
    }
}
