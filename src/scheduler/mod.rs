//! Periodic reconciliation scheduling.
//!
//! Interval and five-field cron triggers drive a single long-lived loop.
//! One job runs at a time: a fire that lands while the previous job is
//! still running is skipped and counted, never run concurrently.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::ParallelReconciler;
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::models::TableSpec;
use crate::report::format::export_report_json;
use crate::report::generate_report;

/// When the scheduler fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    /// Fixed interval in seconds.
    pub fn interval(seconds: u64) -> Result<Self> {
        if seconds == 0 {
            return Err(ReconcileError::Usage(
                "interval must be at least one second".to_string(),
            ));
        }
        Ok(Trigger::Interval(Duration::from_secs(seconds)))
    }

    /// Five-field cron expression (`minute hour day month day_of_week`).
    ///
    /// Rejected before the scheduler starts if the field count or syntax is
    /// wrong. The seconds field required by the underlying grammar is pinned
    /// to `0`.
    pub fn cron(expression: &str) -> Result<Self> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(ReconcileError::Usage(format!(
                "cron expression must have 5 fields (minute hour day month day_of_week), got {fields}"
            )));
        }

        let schedule = cron::Schedule::from_str(&format!("0 {expression}"))
            .map_err(|e| ReconcileError::Usage(format!("invalid cron expression: {e}")))?;
        Ok(Trigger::Cron(Box::new(schedule)))
    }

    /// The next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Trigger::Interval(interval) => Ok(after
                + chrono::Duration::from_std(*interval)
                    .map_err(|e| ReconcileError::Usage(format!("interval out of range: {e}")))?),
            Trigger::Cron(schedule) => schedule.after(&after).next().ok_or_else(|| {
                ReconcileError::Usage("cron expression yields no future fire times".to_string())
            }),
        }
    }
}

/// The work a scheduler fire performs: reconcile the configured tables and
/// write a timestamped report.
#[derive(Clone)]
pub struct ReconcileJob {
    pub reconciler: Arc<ParallelReconciler>,
    pub tables: Vec<TableSpec>,
    pub output_dir: std::path::PathBuf,
}

impl ReconcileJob {
    /// Run one reconciliation pass and persist the report.
    ///
    /// A report-write failure propagates: an undocumented run is a failure.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<std::path::PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        info!(tables = self.tables.len(), "starting scheduled reconciliation");

        let outcome = self
            .reconciler
            .reconcile_tables(self.tables.clone(), cancel)
            .await?;

        let mut report = generate_report(&outcome.results).with_failed_tables(outcome.errors);
        if cancel.is_cancelled() {
            report.partial = true;
        }

        let path = self.output_dir.join(format!("reconcile_{stamp}.json"));
        export_report_json(&report, &path)?;

        info!(
            path = %path.display(),
            status = report.status.as_str(),
            reconciled = outcome.successful,
            failed = report.failed_tables.as_ref().map(Vec::len).unwrap_or(0),
            "scheduled reconciliation complete"
        );
        Ok(path)
    }
}

/// Long-lived blocking scheduler loop.
pub struct Scheduler {
    trigger: Trigger,
    grace_period: Duration,
}

impl Scheduler {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            grace_period: Duration::from_secs(30),
        }
    }

    /// How long a running job may finish after shutdown is requested.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Run until `shutdown` is cancelled. Overlapping fires are skipped and
    /// counted; on shutdown the in-flight job gets the grace period, then
    /// its cancellation token fires and partial results are reported.
    pub async fn run(&self, job: ReconcileJob, shutdown: CancellationToken) -> Result<()> {
        let job = Arc::new(job);
        let running = Arc::new(AtomicBool::new(false));
        let job_cancel = CancellationToken::new();
        let mut current: Option<tokio::task::JoinHandle<()>> = None;
        let mut skipped: u64 = 0;

        let mut next = self.trigger.next_after(Utc::now())?;
        info!(next_fire = %next, "scheduler started");

        loop {
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    if running.load(Ordering::SeqCst) {
                        skipped += 1;
                        metrics::SCHEDULER_RUNS_SKIPPED.inc();
                        warn!(skipped_total = skipped, "previous job still running, skipping this fire");
                    } else {
                        running.store(true, Ordering::SeqCst);
                        let job = job.clone();
                        let running = running.clone();
                        let cancel = job_cancel.clone();
                        current = Some(tokio::spawn(async move {
                            if let Err(e) = job.run_once(&cancel).await {
                                error!(error = %e, "scheduled reconciliation failed");
                            }
                            running.store(false, Ordering::SeqCst);
                        }));
                    }
                    next = self.trigger.next_after(next.max(Utc::now()))?;
                }
            }
        }

        info!("scheduler stopping");
        if let Some(mut handle) = current.take() {
            if running.load(Ordering::SeqCst) {
                info!(
                    grace_secs = self.grace_period.as_secs(),
                    "waiting for in-flight job"
                );
                if tokio::time::timeout(self.grace_period, &mut handle)
                    .await
                    .is_err()
                {
                    warn!("grace period elapsed, cancelling in-flight job");
                    job_cancel.cancel();
                    let _ = handle.await;
                }
            }
        }
        info!(skipped_total = skipped, "scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cron_rejects_wrong_field_count() {
        assert!(Trigger::cron("0 */6 * *").is_err());
        assert!(Trigger::cron("0 */6 * * * *").is_err());
        assert!(Trigger::cron("").is_err());
        assert!(Trigger::cron("not a cron at all").is_err());
    }

    #[test]
    fn test_cron_accepts_five_fields() {
        for expr in ["0 */6 * * *", "*/30 * * * *", "0 0 * * 0", "15 2 1 * *"] {
            assert!(Trigger::cron(expr).is_ok(), "{expr} should parse");
        }
    }

    #[test]
    fn test_cron_next_fire() {
        let trigger = Trigger::cron("0 */6 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 1, 5, 30, 0).unwrap();
        let next = trigger.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_interval_next_fire() {
        let trigger = Trigger::interval(3600).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 1, 5, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(after).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            Trigger::interval(0),
            Err(ReconcileError::Usage(_))
        ));
    }
}
