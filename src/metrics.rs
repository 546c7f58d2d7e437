//! Process-wide Prometheus metrics.
//!
//! All collectors live in one registry created at first use. Exposition is
//! the embedding process's concern; `registry()` hands it the gatherable
//! set. Metric names are a stable interface.

use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The registry holding every engine metric.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Register a collector, tolerating a concurrent registration of the same
/// name. The returned handle shares storage with its clones, so the caller's
/// copy stays valid either way.
fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    match REGISTRY.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => collector,
        Err(e) => panic!("metric registration failed: {e}"),
    }
}

pub static RECONCILIATION_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new("reconciliation_runs_total", "Reconciliation runs per table"),
            &["table", "status"],
        )
        .expect("valid metric opts"),
    )
});

pub static RECONCILIATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register(
        HistogramVec::new(
            HistogramOpts::new(
                "reconciliation_duration_seconds",
                "Time to reconcile a single table",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0, 3600.0]),
            &["table"],
        )
        .expect("valid metric opts"),
    )
});

pub static ROW_LEVEL_DISCREPANCIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "row_level_discrepancies_total",
                "Row-level discrepancies found, by kind",
            ),
            &["table", "kind"],
        )
        .expect("valid metric opts"),
    )
});

pub static CHECKSUM_STATE_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "checksum_state_operations_total",
                "Checksum state file operations",
            ),
            &["operation"],
        )
        .expect("valid metric opts"),
    )
});

pub static INCREMENTAL_CHECKSUM_ROWS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "incremental_checksum_rows_total",
                "Rows hashed by the incremental checksum path",
            ),
            &["table", "mode"],
        )
        .expect("valid metric opts"),
    )
});

pub static INCREMENTAL_CHECKSUM_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register(
        HistogramVec::new(
            HistogramOpts::new(
                "incremental_checksum_seconds",
                "Time to compute an incremental checksum",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["table", "mode"],
        )
        .expect("valid metric opts"),
    )
});

pub static PARALLEL_TABLES: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "parallel_tables_total",
                "Tables processed by the parallel orchestrator, by outcome",
            ),
            &["status"],
        )
        .expect("valid metric opts"),
    )
});

pub static SCHEDULER_RUNS_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "scheduler_runs_skipped_total",
            "Trigger fires skipped because the previous job was still running",
        )
        .expect("valid metric opts"),
    )
});

pub static POOL_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register(
        IntGaugeVec::new(
            Opts::new("db_connection_pool_size", "Connections held by the pool"),
            &["db", "pool"],
        )
        .expect("valid metric opts"),
    )
});

pub static POOL_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register(
        IntGaugeVec::new(
            Opts::new("db_connection_pool_active", "Connections checked out"),
            &["db", "pool"],
        )
        .expect("valid metric opts"),
    )
});

pub static POOL_IDLE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register(
        IntGaugeVec::new(
            Opts::new("db_connection_pool_idle", "Idle connections in the pool"),
            &["db", "pool"],
        )
        .expect("valid metric opts"),
    )
});

pub static POOL_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "db_connection_pool_timeouts_total",
                "Acquire attempts that hit the pool timeout",
            ),
            &["db", "pool"],
        )
        .expect("valid metric opts"),
    )
});

pub static POOL_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "db_connection_pool_errors_total",
                "Connection creation and health-check failures",
            ),
            &["db", "pool", "error_type"],
        )
        .expect("valid metric opts"),
    )
});

pub static POOL_ACQUIRE_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    register(
        HistogramVec::new(
            HistogramOpts::new(
                "db_connection_acquire_seconds",
                "Time to acquire a connection from the pool",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["db", "pool"],
        )
        .expect("valid metric opts"),
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before = RECONCILIATION_RUNS
            .with_label_values(&["t", "match"])
            .get();
        RECONCILIATION_RUNS.with_label_values(&["t", "match"]).inc();
        assert_eq!(
            RECONCILIATION_RUNS.with_label_values(&["t", "match"]).get(),
            before + 1
        );
    }

    #[test]
    fn test_duplicate_registration_is_tolerated() {
        // Same name and labels as the static; must not panic.
        let duplicate = IntCounterVec::new(
            Opts::new("reconciliation_runs_total", "Reconciliation runs per table"),
            &["table", "status"],
        )
        .unwrap();
        let handle = register(duplicate);
        handle.with_label_values(&["x", "y"]).inc();
    }

    #[test]
    fn test_registry_gathers_engine_metrics() {
        SCHEDULER_RUNS_SKIPPED.inc();
        let families = registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "scheduler_runs_skipped_total"));
    }
}
