//! Re-render a previously generated report.

use std::process::ExitCode;

use tracing::info;

use crate::cli::ReportArgs;
use crate::error::Result;
use crate::report::format::load_report_json;

use super::run::emit_report;
use crate::cli::OutputArgs;

pub async fn cmd_report(args: ReportArgs) -> Result<ExitCode> {
    info!(input = %args.input.display(), "loading report");
    let report = load_report_json(&args.input)?;

    emit_report(
        &report,
        &OutputArgs {
            output: args.output,
            output_dir: None,
            format: args.format,
        },
    )?;

    Ok(ExitCode::SUCCESS)
}
