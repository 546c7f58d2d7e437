//! Single-table reconciliation pipeline.
//!
//! Counts, then optional checksums, then an optional row-level diff with
//! repair output. Mismatch is recorded on the result; only infrastructure
//! failures raise.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, Instrument};

use crate::db::QueryExecutor;
use crate::engine::checksum::{
    calculate_checksum, calculate_checksum_chunked, DEFAULT_CHUNK_SIZE,
};
use crate::engine::repair::generate_repair_script;
use crate::engine::row_level::{RowLevelOptions, RowLevelReconciler};
use crate::error::Result;
use crate::metrics;
use crate::models::{compare_row_counts, TableResult, TableSpec};
use crate::retry::{Retry, RetryConfig};

/// Per-table pipeline options.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub validate_checksums: bool,
    /// Columns included in the checksum; `None` hashes every column.
    pub checksum_columns: Option<Vec<String>>,
    pub checksum_chunk_size: usize,
    /// Row count above which checksums switch to the chunked path.
    pub chunked_threshold: i64,
    pub force_chunked: bool,
    pub row_level: bool,
    pub row_level_options: RowLevelOptions,
    pub generate_repair: bool,
    pub output_dir: PathBuf,
    pub retry: RetryConfig,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            validate_checksums: false,
            checksum_columns: None,
            checksum_chunk_size: DEFAULT_CHUNK_SIZE,
            chunked_threshold: 1_000_000,
            force_chunked: false,
            row_level: false,
            row_level_options: RowLevelOptions::default(),
            generate_repair: false,
            output_dir: PathBuf::from("."),
            retry: RetryConfig::default(),
        }
    }
}

/// Reconcile one table pair into a [`TableResult`].
pub async fn reconcile_table(
    source: &mut (dyn QueryExecutor + Send),
    target: &mut (dyn QueryExecutor + Send),
    spec: &TableSpec,
    options: &ReconcileOptions,
) -> Result<TableResult> {
    let span = tracing::info_span!("reconcile_table", table = %spec.target);
    let timer = metrics::RECONCILIATION_DURATION
        .with_label_values(&[spec.target.as_str()])
        .start_timer();

    let outcome = reconcile_table_inner(source, target, spec, options)
        .instrument(span)
        .await;

    timer.observe_duration();
    let status = match &outcome {
        Ok(result) if result.matches => "match",
        Ok(_) => "mismatch",
        Err(_) => "error",
    };
    metrics::RECONCILIATION_RUNS
        .with_label_values(&[spec.target.as_str(), status])
        .inc();

    outcome
}

async fn reconcile_table_inner(
    source: &mut (dyn QueryExecutor + Send),
    target: &mut (dyn QueryExecutor + Send),
    spec: &TableSpec,
    options: &ReconcileOptions,
) -> Result<TableResult> {
    let retry = Retry::new(options.retry.clone());

    let source_count =
        crate::engine::counts::get_row_count(source, &spec.source, &retry).await?;
    let target_count =
        crate::engine::counts::get_row_count(target, &spec.target, &retry).await?;
    let counts = compare_row_counts(&spec.target, source_count, target_count)?;

    let mut result = TableResult {
        table: spec.target.clone(),
        source_count: counts.source_count,
        target_count: counts.target_count,
        difference: counts.difference,
        matches: counts.matches,
        checksum_match: None,
        source_checksum: None,
        target_checksum: None,
        row_discrepancies: None,
        repair_script_path: None,
        timestamp: Utc::now(),
    };

    if options.validate_checksums {
        let chunked = options.force_chunked
            || source_count.max(target_count) > options.chunked_threshold;
        let columns = options.checksum_columns.as_deref();

        let (source_checksum, target_checksum) = if chunked {
            (
                calculate_checksum_chunked(
                    source,
                    &spec.source,
                    columns,
                    options.checksum_chunk_size,
                    &retry,
                )
                .await?,
                calculate_checksum_chunked(
                    target,
                    &spec.target,
                    columns,
                    options.checksum_chunk_size,
                    &retry,
                )
                .await?,
            )
        } else {
            (
                calculate_checksum(source, &spec.source, columns).await?,
                calculate_checksum(target, &spec.target, columns).await?,
            )
        };

        let checksum_match = source_checksum == target_checksum;
        result.source_checksum = Some(source_checksum);
        result.target_checksum = Some(target_checksum);
        result.checksum_match = Some(checksum_match);
        result.matches = result.matches && checksum_match;
    }

    if !result.matches && options.row_level {
        info!(table = %spec.target, "mismatch detected, running row-level reconciliation");
        let mut differ = RowLevelReconciler::new(
            source,
            target,
            options.row_level_options.clone(),
            &retry,
        );
        let discrepancies = differ.reconcile_table(&spec.source, &spec.target).await?;

        if options.generate_repair && !discrepancies.is_empty() {
            let script = generate_repair_script(&discrepancies, &spec.target, target.dialect())?;
            std::fs::create_dir_all(&options.output_dir)?;
            let path = options
                .output_dir
                .join(format!("repair_{}.sql", spec.target));
            std::fs::write(&path, script)?;
            info!(table = %spec.target, path = %path.display(), "wrote repair script");
            result.repair_script_path = Some(path);
        }

        result.row_discrepancies = Some(discrepancies);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::stub::StubExecutor;
    use crate::db::{Dialect, SqlValue};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_matching_counts_without_checksum() {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(1000));
        target.push_scalar(SqlValue::Int(1000));

        let spec = TableSpec::new("dbo.customers", "customers").unwrap();
        let result = reconcile_table(&mut source, &mut target, &spec, &ReconcileOptions::default())
            .await
            .unwrap();

        assert!(result.matches);
        assert_eq!(result.difference, 0);
        assert!(result.checksum_match.is_none());
        assert!(result.row_discrepancies.is_none());
    }

    #[tokio::test]
    async fn test_count_mismatch_is_data_not_error() {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(1000));
        target.push_scalar(SqlValue::Int(950));

        let spec = TableSpec::same("orders").unwrap();
        let result = reconcile_table(&mut source, &mut target, &spec, &ReconcileOptions::default())
            .await
            .unwrap();

        assert!(!result.matches);
        assert_eq!(result.difference, -50);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_with_equal_counts() {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(1));
        target.push_scalar(SqlValue::Int(1));
        // Checksum path: pk discovery + rows for each side.
        source.push_rows(&["name"], vec![vec![SqlValue::Text("id".into())]]);
        source.push_rows(
            &["id", "price"],
            vec![vec![SqlValue::Int(1), SqlValue::Float(9.99)]],
        );
        target.push_rows(&["attname"], vec![vec![SqlValue::Text("id".into())]]);
        target.push_rows(
            &["id", "price"],
            vec![vec![SqlValue::Int(1), SqlValue::Float(8.99)]],
        );

        let spec = TableSpec::same("products").unwrap();
        let options = ReconcileOptions {
            validate_checksums: true,
            ..ReconcileOptions::default()
        };
        let result = reconcile_table(&mut source, &mut target, &spec, &options)
            .await
            .unwrap();

        assert!(!result.matches, "checksum mismatch must fail the table");
        assert_eq!(result.checksum_match, Some(false));
        assert_eq!(result.difference, 0);
        assert_ne!(result.source_checksum, result.target_checksum);
    }

    #[tokio::test]
    async fn test_row_level_skipped_when_counts_match() {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(3));
        target.push_scalar(SqlValue::Int(3));

        let spec = TableSpec::same("users").unwrap();
        let options = ReconcileOptions {
            row_level: true,
            ..ReconcileOptions::default()
        };
        let result = reconcile_table(&mut source, &mut target, &spec, &options)
            .await
            .unwrap();

        assert!(result.matches);
        assert!(result.row_discrepancies.is_none());
        // Only the two count queries ran.
        assert_eq!(source.executed.len(), 1);
        assert_eq!(target.executed.len(), 1);
    }

    #[tokio::test]
    async fn test_row_level_repair_on_count_mismatch() {
        let output = TempDir::new().unwrap();

        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(3));
        target.push_scalar(SqlValue::Int(2));
        // Row-level pass: size guards, pk sets, fetches.
        source.push_scalar(SqlValue::Int(3));
        target.push_scalar(SqlValue::Int(2));
        source.push_rows(
            &["id"],
            vec![
                vec![SqlValue::Int(1)],
                vec![SqlValue::Int(2)],
                vec![SqlValue::Int(3)],
            ],
        );
        target.push_rows(
            &["id"],
            vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
        );
        // Missing row fetch (id=3).
        source.push_rows(
            &["id", "name"],
            vec![vec![SqlValue::Int(3), SqlValue::Text("Alice".into())]],
        );
        // Common fetches (ids 1, 2).
        source.push_rows(
            &["id", "name"],
            vec![
                vec![SqlValue::Int(1), SqlValue::Text("John".into())],
                vec![SqlValue::Int(2), SqlValue::Text("Jane".into())],
            ],
        );
        target.push_rows(
            &["id", "name"],
            vec![
                vec![SqlValue::Int(1), SqlValue::Text("John".into())],
                vec![SqlValue::Int(2), SqlValue::Text("Jane".into())],
            ],
        );

        let spec = TableSpec::same("users").unwrap();
        let options = ReconcileOptions {
            row_level: true,
            generate_repair: true,
            output_dir: output.path().to_path_buf(),
            ..ReconcileOptions::default()
        };
        let result = reconcile_table(&mut source, &mut target, &spec, &options)
            .await
            .unwrap();

        assert!(!result.matches);
        let discrepancies = result.row_discrepancies.unwrap();
        assert_eq!(discrepancies.len(), 1);

        let script_path = result.repair_script_path.unwrap();
        assert_eq!(script_path, output.path().join("repair_users.sql"));
        let script = std::fs::read_to_string(script_path).unwrap();
        assert!(script.contains("BEGIN;"));
        assert!(script.contains("INSERT INTO \"users\" (\"id\", \"name\") VALUES (3, 'Alice');"));
        assert!(script.contains("COMMIT;"));
    }
}
