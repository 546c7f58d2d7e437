//! One-shot reconciliation command.

use std::process::ExitCode;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::{OutputArgs, OutputFormat, RunArgs};
use crate::engine::{
    reconcile_table, ParallelOptions, ParallelReconciler, TableFailure,
};
use crate::error::{ReconcileError, Result};
use crate::models::TableResult;
use crate::report::format::{export_report_csv, export_report_json, format_report_console, render_report_json};
use crate::report::{generate_report, Report, ReportStatus};

use super::{build_reconcile_options, open_pools, resolve_tables};

pub async fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let tables = resolve_tables(&args.selection)?;
    info!(tables = tables.len(), "starting reconciliation run");

    let (source_pool, target_pool) = open_pools(&args.credentials).await?;
    let options = build_reconcile_options(&args.validation, args.output.output_dir.as_deref());

    let (results, failures) = if args.execution.parallel && tables.len() > 1 {
        let reconciler = ParallelReconciler::new(
            source_pool,
            target_pool,
            ParallelOptions {
                workers: args.execution.parallel_workers,
                table_timeout: Duration::from_secs(args.execution.parallel_timeout),
                fail_fast: !args.execution.continue_on_error,
            },
            options,
        );
        let outcome = reconciler
            .reconcile_tables(tables, &CancellationToken::new())
            .await?;
        info!(
            successful = outcome.successful,
            failed = outcome.failed,
            timeout = outcome.timeout,
            duration_secs = outcome.duration_seconds,
            "parallel reconciliation complete"
        );
        (outcome.results, outcome.errors)
    } else {
        let mut source = source_pool.acquire().await?;
        let mut target = target_pool.acquire().await?;

        let mut results: Vec<TableResult> = Vec::with_capacity(tables.len());
        let mut failures: Vec<TableFailure> = Vec::new();

        for spec in &tables {
            info!(table = %spec, "reconciling table");
            match reconcile_table(&mut *source, &mut *target, spec, &options).await {
                Ok(result) => {
                    info!(
                        table = %spec,
                        status = if result.matches { "MATCH" } else { "MISMATCH" },
                        "table reconciled"
                    );
                    results.push(result);
                }
                Err(e) => {
                    error!(table = %spec, error = %e, "table reconciliation failed");
                    if !args.execution.continue_on_error {
                        return Err(e);
                    }
                    failures.push(TableFailure {
                        table: spec.target.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        (results, failures)
    };

    let report = generate_report(&results).with_failed_tables(failures);
    emit_report(&report, &args.output)?;

    Ok(if report.status == ReportStatus::Pass {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Write or print the report per the output flags.
pub(crate) fn emit_report(report: &Report, output: &OutputArgs) -> Result<()> {
    match output.format {
        OutputFormat::Json => match &output.output {
            Some(path) => {
                export_report_json(report, path)?;
                info!(path = %path.display(), "report saved");
            }
            None => println!("{}", render_report_json(report)?),
        },
        OutputFormat::Csv => match &output.output {
            Some(path) => {
                export_report_csv(report, path)?;
                info!(path = %path.display(), "report saved");
            }
            None => {
                return Err(ReconcileError::Usage(
                    "CSV format requires --output".to_string(),
                ))
            }
        },
        OutputFormat::Console => println!("{}", format_report_console(report)),
    }
    Ok(())
}
