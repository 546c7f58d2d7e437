//! Command-line interface.
//!
//! Three subcommands: `run` (one-shot), `schedule` (long-running), and
//! `report` (re-render a prior JSON report).

mod commands;
mod credentials;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use crate::error::Result;

#[derive(Parser)]
#[command(name = "replicheck")]
#[command(about = "Data reconciliation for SQL Server to PostgreSQL CDC pipelines")]
#[command(version)]
pub struct Cli {
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log file path (console only when unset)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-shot reconciliation
    Run(RunArgs),

    /// Run reconciliation periodically, writing timestamped reports
    Schedule(ScheduleArgs),

    /// Re-render a previously generated JSON report
    Report(ReportArgs),
}

/// Which tables to reconcile.
#[derive(Args, Clone)]
pub struct SelectionArgs {
    /// Comma-separated list of tables (same name on both sides)
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// File with one table name per line; blank lines are ignored
    #[arg(long, conflicts_with = "tables")]
    pub tables_file: Option<PathBuf>,
}

/// Database credentials, from flags, environment, or Vault.
#[derive(Args, Clone)]
pub struct CredentialArgs {
    /// SQL Server hostname
    #[arg(long, env = "SQLSERVER_HOST")]
    pub source_server: Option<String>,

    /// SQL Server database name
    #[arg(long, env = "SQLSERVER_DATABASE")]
    pub source_database: Option<String>,

    /// SQL Server username
    #[arg(long, env = "SQLSERVER_USER")]
    pub source_user: Option<String>,

    /// SQL Server password
    #[arg(long, env = "SQLSERVER_PASSWORD", hide_env_values = true)]
    pub source_password: Option<String>,

    /// PostgreSQL hostname
    #[arg(long, env = "POSTGRES_HOST")]
    pub target_host: Option<String>,

    /// PostgreSQL port
    #[arg(long, env = "POSTGRES_PORT")]
    pub target_port: Option<u16>,

    /// PostgreSQL database name
    #[arg(long, env = "POSTGRES_DB")]
    pub target_database: Option<String>,

    /// PostgreSQL username
    #[arg(long, env = "POSTGRES_USER")]
    pub target_user: Option<String>,

    /// PostgreSQL password
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub target_password: Option<String>,

    /// Fetch credentials from HashiCorp Vault (VAULT_ADDR/VAULT_TOKEN)
    #[arg(long)]
    pub use_vault: bool,
}

/// How thoroughly to validate each table.
#[derive(Args, Clone)]
pub struct ValidationArgs {
    /// Validate data checksums (slower but more thorough)
    #[arg(long)]
    pub validate_checksums: bool,

    /// Enumerate missing/extra/modified rows on mismatch
    #[arg(long)]
    pub row_level: bool,

    /// Comma-separated primary key columns for row-level comparison
    #[arg(long, default_value = "id", value_delimiter = ',')]
    pub pk_columns: Vec<String>,

    /// Batch size for row-level fetches
    #[arg(long, default_value_t = 1000)]
    pub row_level_chunk_size: usize,

    /// Write SQL repair scripts for row-level discrepancies
    #[arg(long)]
    pub generate_repair: bool,
}

/// Parallelism and failure policy.
#[derive(Args, Clone)]
pub struct ExecutionArgs {
    /// Reconcile tables concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Number of parallel workers
    #[arg(long, default_value_t = 4)]
    pub parallel_workers: usize,

    /// Per-table timeout in seconds
    #[arg(long, default_value_t = 3600)]
    pub parallel_timeout: u64,

    /// Record failed tables and keep going instead of aborting
    #[arg(long)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Console,
    Json,
    Csv,
}

/// Where and how to write the report.
#[derive(Args, Clone)]
pub struct OutputArgs {
    /// Report output file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Directory for generated artifacts (reports, repair scripts)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value = "console")]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
    #[command(flatten)]
    pub credentials: CredentialArgs,
    #[command(flatten)]
    pub validation: ValidationArgs,
    #[command(flatten)]
    pub execution: ExecutionArgs,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args)]
pub struct ScheduleArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
    #[command(flatten)]
    pub credentials: CredentialArgs,
    #[command(flatten)]
    pub validation: ValidationArgs,
    #[command(flatten)]
    pub execution: ExecutionArgs,
    #[command(flatten)]
    pub output: OutputArgs,

    /// Fire every N seconds
    #[arg(long, conflicts_with = "cron")]
    pub interval: Option<u64>,

    /// Five-field cron expression, e.g. "0 */6 * * *"
    #[arg(long)]
    pub cron: Option<String>,
}

#[derive(Args)]
pub struct ReportArgs {
    /// Previously generated report JSON
    #[arg(long)]
    pub input: PathBuf,

    /// Output file (required for json/csv)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "console")]
    pub format: OutputFormat,
}

impl Cli {
    pub async fn execute(self) -> Result<ExitCode> {
        match self.command {
            Commands::Run(args) => commands::cmd_run(args).await,
            Commands::Schedule(args) => commands::cmd_schedule(args).await,
            Commands::Report(args) => commands::cmd_report(args).await,
        }
    }
}
