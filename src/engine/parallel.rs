//! Bounded-parallel reconciliation across tables.
//!
//! A fixed pool of worker tasks draws table specs from a shared queue. Each
//! worker checks its own source and target connection out of the pools for
//! every table it handles; cursors are never shared between workers.
//! Results flow back to the aggregator over a channel, so `results` carries
//! no ordering guarantee.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::db::ConnectionPool;
use crate::engine::reconciler::{reconcile_table, ReconcileOptions};
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::models::{TableResult, TableSpec};

#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub workers: usize,
    /// Per-table deadline; a table that overruns is recorded as timed out
    /// and its worker moves on.
    pub table_timeout: Duration,
    /// Cancel outstanding work on the first failure instead of recording it
    /// and continuing.
    pub fail_fast: bool,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            table_timeout: Duration::from_secs(3600),
            fail_fast: false,
        }
    }
}

/// One table that could not be reconciled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Aggregate outcome of a parallel run.
#[derive(Debug)]
pub struct ParallelOutcome {
    pub results: Vec<TableResult>,
    pub successful: usize,
    pub failed: usize,
    pub timeout: usize,
    pub errors: Vec<TableFailure>,
    pub duration_seconds: f64,
}

enum WorkerMessage {
    Done(TableResult),
    Failed(TableFailure),
    TimedOut(String),
}

/// Reconciles many tables concurrently with per-table isolation.
pub struct ParallelReconciler {
    source_pool: Arc<ConnectionPool>,
    target_pool: Arc<ConnectionPool>,
    options: ParallelOptions,
    reconcile_options: ReconcileOptions,
}

impl ParallelReconciler {
    pub fn new(
        source_pool: Arc<ConnectionPool>,
        target_pool: Arc<ConnectionPool>,
        options: ParallelOptions,
        reconcile_options: ReconcileOptions,
    ) -> Self {
        Self {
            source_pool,
            target_pool,
            options,
            reconcile_options,
        }
    }

    /// Run the worker pool over `tables` until the queue drains, the run is
    /// cancelled through `shutdown`, or (under fail-fast) a table fails.
    pub async fn reconcile_tables(
        &self,
        tables: Vec<TableSpec>,
        shutdown: &CancellationToken,
    ) -> Result<ParallelOutcome> {
        let span = tracing::info_span!("reconciliation_job", tables = tables.len());
        self.reconcile_tables_inner(tables, shutdown)
            .instrument(span)
            .await
    }

    async fn reconcile_tables_inner(
        &self,
        tables: Vec<TableSpec>,
        shutdown: &CancellationToken,
    ) -> Result<ParallelOutcome> {
        let started = Instant::now();
        let total = tables.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(tables)));
        let cancel = shutdown.child_token();
        let (tx, mut rx) = mpsc::channel::<WorkerMessage>(64);

        info!(
            tables = total,
            workers = self.options.workers,
            timeout_secs = self.options.table_timeout.as_secs(),
            fail_fast = self.options.fail_fast,
            "starting parallel reconciliation"
        );

        let mut handles = Vec::with_capacity(self.options.workers.max(1));
        for worker_id in 0..self.options.workers.max(1) {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                queue.clone(),
                self.source_pool.clone(),
                self.target_pool.clone(),
                self.options.clone(),
                self.reconcile_options.clone(),
                cancel.clone(),
                tx.clone(),
            )));
        }
        drop(tx);

        let mut outcome = ParallelOutcome {
            results: Vec::with_capacity(total),
            successful: 0,
            failed: 0,
            timeout: 0,
            errors: Vec::new(),
            duration_seconds: 0.0,
        };

        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Done(result) => {
                    outcome.successful += 1;
                    outcome.results.push(result);
                    metrics::PARALLEL_TABLES.with_label_values(&["success"]).inc();
                }
                WorkerMessage::Failed(failure) => {
                    outcome.failed += 1;
                    metrics::PARALLEL_TABLES.with_label_values(&["failed"]).inc();
                    if self.options.fail_fast {
                        error!(table = %failure.table, error = %failure.error, "failing fast");
                        cancel.cancel();
                    }
                    outcome.errors.push(failure);
                }
                WorkerMessage::TimedOut(table) => {
                    outcome.timeout += 1;
                    metrics::PARALLEL_TABLES.with_label_values(&["timeout"]).inc();
                    warn!(table = %table, "table reconciliation timed out");
                    let error = ReconcileError::Timeout {
                        table: table.clone(),
                        seconds: self.options.table_timeout.as_secs(),
                    };
                    outcome.errors.push(TableFailure {
                        error: error.to_string(),
                        table,
                    });
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        outcome.duration_seconds = started.elapsed().as_secs_f64();
        info!(
            successful = outcome.successful,
            failed = outcome.failed,
            timeout = outcome.timeout,
            duration_secs = outcome.duration_seconds,
            "parallel reconciliation finished"
        );

        if self.options.fail_fast {
            if let Some(first) = outcome.errors.first() {
                return Err(ReconcileError::Aborted {
                    failed: outcome.errors.len(),
                    table: first.table.clone(),
                    error: first.error.clone(),
                });
            }
        }

        Ok(outcome)
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<VecDeque<TableSpec>>>,
    source_pool: Arc<ConnectionPool>,
    target_pool: Arc<ConnectionPool>,
    options: ParallelOptions,
    reconcile_options: ReconcileOptions,
    cancel: CancellationToken,
    tx: mpsc::Sender<WorkerMessage>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let Some(spec) = queue.lock().ok().and_then(|mut q| q.pop_front()) else {
            break;
        };

        let table = spec.target.clone();
        let work = reconcile_one(&source_pool, &target_pool, &spec, &reconcile_options);

        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(options.table_timeout, work) => match result {
                Ok(Ok(table_result)) => WorkerMessage::Done(table_result),
                Ok(Err(e)) => {
                    error!(worker_id, table = %table, error = %e, "table reconciliation failed");
                    WorkerMessage::Failed(TableFailure {
                        table,
                        error: e.to_string(),
                    })
                }
                Err(_) => WorkerMessage::TimedOut(table),
            },
        };

        if tx.send(message).await.is_err() {
            break;
        }
    }
}

async fn reconcile_one(
    source_pool: &ConnectionPool,
    target_pool: &ConnectionPool,
    spec: &TableSpec,
    options: &ReconcileOptions,
) -> Result<TableResult> {
    let mut source = source_pool.acquire().await?;
    let mut target = target_pool.acquire().await?;
    reconcile_table(&mut *source, &mut *target, spec, options).await
}
