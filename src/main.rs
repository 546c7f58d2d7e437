//! replicheck binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replicheck::cli::Cli;
use replicheck::ReconcileError;

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { "debug" } else { &cli.log_level };
        EnvFilter::new(format!("replicheck={level}"))
    });
    let registry = tracing_subscriber::registry().with(filter);

    match (&cli.log_file, cli.json_logs) {
        (Some(path), json) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let writer = Arc::new(file);
            if json {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init();
            } else {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(writer),
                    )
                    .init();
            }
        }
        (None, true) => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        (None, false) => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before anything reads the environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match cli.execute().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "reconciliation failed");
            eprintln!("error: {e}");
            match e {
                ReconcileError::Usage(_)
                | ReconcileError::InvalidIdentifier(_)
                | ReconcileError::Credentials(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
