//! Counters describing the collector's own activity.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

pub const QUERIES_SCANNED: &str = "qp_queries_scanned";
pub const EXEC_PLANS: &str = "qp_exec_plans";
pub const ERRORS_TOTAL: &str = "qp_errors_total";

static SHARED: LazyLock<Arc<SelfMetrics>> = LazyLock::new(|| Arc::new(SelfMetrics::new()));

/// Increment/snapshot interface so pipelines can share or isolate counters.
pub trait MetricsCollector: Send + Sync {
    fn inc_queries(&self);
    fn inc_plans(&self);
    fn inc_errors(&self);
    /// Point-in-time values. Counters are read one by one, not atomically
    /// as a group.
    fn snapshot(&self) -> BTreeMap<&'static str, u64>;
}

/// Atomic counters for the lifetime of the owning process or pipeline.
#[derive(Debug, Default)]
pub struct SelfMetrics {
    queries: AtomicU64,
    plans: AtomicU64,
    errors: AtomicU64,
}

impl SelfMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide counters.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }
}

impl MetricsCollector for SelfMetrics {
    fn inc_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_plans(&self) {
        self.plans.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            (QUERIES_SCANNED, self.queries.load(Ordering::Relaxed)),
            (EXEC_PLANS, self.plans.load(Ordering::Relaxed)),
            (ERRORS_TOTAL, self.errors.load(Ordering::Relaxed)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn counters_are_independent() {
        let m = SelfMetrics::new();
        m.inc_queries();
        m.inc_queries();
        m.inc_plans();
        let snap = m.snapshot();
        assert_eq!(snap[QUERIES_SCANNED], 2);
        assert_eq!(snap[EXEC_PLANS], 1);
        assert_eq!(snap[ERRORS_TOTAL], 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let m = Arc::new(SelfMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.inc_errors();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.snapshot()[ERRORS_TOTAL], 8000);
    }

    #[test]
    fn isolated_instances_do_not_share_counts() {
        let a = SelfMetrics::new();
        let b = SelfMetrics::new();
        a.inc_plans();
        assert_eq!(b.snapshot()[EXEC_PLANS], 0);
        assert!(Arc::ptr_eq(&SelfMetrics::shared(), &SelfMetrics::shared()));
    }
}
