//! CLI command implementations.

mod report;
mod run;
mod schedule;

use std::fs;
use std::sync::Arc;

pub use report::cmd_report;
pub use run::cmd_run;
pub use schedule::cmd_schedule;

use crate::cli::{CredentialArgs, SelectionArgs, ValidationArgs};
use crate::config::{PostgresConfig, SqlServerConfig};
use crate::db::{ConnectionPool, MssqlConnector, PgConnector, PoolConfig};
use crate::engine::{ReconcileOptions, RowLevelOptions};
use crate::error::{ReconcileError, Result};
use crate::models::TableSpec;

/// Resolve the table list from `--tables` or `--tables-file`. Every name is
/// identifier-validated here, before any connection is opened.
pub(crate) fn resolve_tables(selection: &SelectionArgs) -> Result<Vec<TableSpec>> {
    let names: Vec<String> = if let Some(path) = &selection.tables_file {
        fs::read_to_string(path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    } else {
        selection
            .tables
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    };

    if names.is_empty() {
        return Err(ReconcileError::Usage(
            "no tables selected; use --tables or --tables-file".to_string(),
        ));
    }

    names.into_iter().map(TableSpec::same).collect()
}

/// Open both connection pools from resolved credentials.
pub(crate) async fn open_pools(
    credentials: &CredentialArgs,
) -> Result<(Arc<ConnectionPool>, Arc<ConnectionPool>)> {
    let (source_config, target_config): (SqlServerConfig, PostgresConfig) =
        crate::cli::credentials::resolve(credentials).await?;

    let source_pool = Arc::new(ConnectionPool::new(
        Arc::new(MssqlConnector::new(source_config)),
        PoolConfig::default(),
        "source",
    ));
    let target_pool = Arc::new(ConnectionPool::new(
        Arc::new(PgConnector::new(target_config)),
        PoolConfig::default(),
        "target",
    ));
    Ok((source_pool, target_pool))
}

/// Translate validation flags into engine options.
pub(crate) fn build_reconcile_options(
    validation: &ValidationArgs,
    output_dir: Option<&std::path::Path>,
) -> ReconcileOptions {
    ReconcileOptions {
        validate_checksums: validation.validate_checksums,
        row_level: validation.row_level,
        row_level_options: RowLevelOptions {
            pk_columns: validation.pk_columns.clone(),
            chunk_size: validation.row_level_chunk_size,
            ..RowLevelOptions::default()
        },
        generate_repair: validation.generate_repair,
        output_dir: output_dir
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from(".")),
        ..ReconcileOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::SelectionArgs;

    #[test]
    fn test_resolve_tables_from_csv_flag() {
        let selection = SelectionArgs {
            tables: vec!["customers".to_string(), " orders ".to_string()],
            tables_file: None,
        };
        let specs = resolve_tables(&selection).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].target, "orders");
    }

    #[test]
    fn test_resolve_tables_rejects_injection_before_any_connection() {
        let selection = SelectionArgs {
            tables: vec!["customers; DROP TABLE users--".to_string()],
            tables_file: None,
        };
        let err = resolve_tables(&selection).unwrap_err();
        match err {
            ReconcileError::InvalidIdentifier(name) => {
                assert!(name.contains("DROP TABLE"), "error names the rejected input")
            }
            other => panic!("expected InvalidIdentifier, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_tables_from_file_skips_blanks() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tables.txt");
        fs::write(&path, "customers\n\n  orders  \n").unwrap();

        let selection = SelectionArgs {
            tables: vec![],
            tables_file: Some(path),
        };
        let specs = resolve_tables(&selection).unwrap();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn test_empty_selection_is_usage_error() {
        let selection = SelectionArgs {
            tables: vec![],
            tables_file: None,
        };
        assert!(matches!(
            resolve_tables(&selection),
            Err(ReconcileError::Usage(_))
        ));
    }
}
