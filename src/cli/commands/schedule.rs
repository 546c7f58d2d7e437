//! Long-running scheduled reconciliation command.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::ScheduleArgs;
use crate::engine::{ParallelOptions, ParallelReconciler};
use crate::error::{ReconcileError, Result};
use crate::scheduler::{ReconcileJob, Scheduler, Trigger};

use super::{build_reconcile_options, open_pools, resolve_tables};

pub async fn cmd_schedule(args: ScheduleArgs) -> Result<ExitCode> {
    let tables = resolve_tables(&args.selection)?;

    // Trigger validation happens before any connection is opened.
    let trigger = match (&args.interval, &args.cron) {
        (Some(seconds), None) => Trigger::interval(*seconds)?,
        (None, Some(expression)) => Trigger::cron(expression)?,
        _ => {
            return Err(ReconcileError::Usage(
                "scheduled mode requires exactly one of --interval or --cron".to_string(),
            ))
        }
    };

    let output_dir = args
        .output
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./reconciliation_reports"));
    std::fs::create_dir_all(&output_dir)?;

    let (source_pool, target_pool) = open_pools(&args.credentials).await?;
    let options = build_reconcile_options(&args.validation, Some(&output_dir));

    let reconciler = Arc::new(ParallelReconciler::new(
        source_pool,
        target_pool,
        ParallelOptions {
            workers: args.execution.parallel_workers,
            table_timeout: Duration::from_secs(args.execution.parallel_timeout),
            fail_fast: false,
        },
        options,
    ));

    let job = ReconcileJob {
        reconciler,
        tables,
        output_dir,
    };

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    info!("scheduler starting; send SIGINT or SIGTERM to stop");
    Scheduler::new(trigger).run(job, shutdown).await?;

    // The loop only ends on an interrupt.
    Ok(ExitCode::from(130))
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("shutdown signal received");
        token.cancel();
    });
}
