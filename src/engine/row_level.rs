//! Row-level reconciliation by primary-key set algebra.
//!
//! Loads the primary-key sets of both sides, classifies keys as missing,
//! extra, or common, then fetches the affected rows and diffs them column
//! by column. Emission order is missing, extra, modified, with keys sorted
//! inside each kind so runs are reproducible.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, Instrument};

use crate::db::{Dialect, QueryExecutor, SqlValue};
use crate::engine::counts::get_row_count;
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::models::{DiscrepancyKind, RowData, RowDiscrepancy};
use crate::retry::{Retry, WithRetry};
use crate::sql;

/// Hard ceiling on the per-side primary-key set. Bigger tables are rejected
/// with a dedicated error instead of exhausting memory.
pub const MAX_PK_ROWS: i64 = 10_000_000;

type PkTuple = Vec<SqlValue>;

#[derive(Debug, Clone)]
pub struct RowLevelOptions {
    pub pk_columns: Vec<String>,
    /// Columns to compare; `None` compares every column.
    pub compare_columns: Option<Vec<String>>,
    /// Batch size for fetching rows of single-column keys.
    pub chunk_size: usize,
    pub float_tolerance: f64,
}

impl Default for RowLevelOptions {
    fn default() -> Self {
        Self {
            pk_columns: vec!["id".to_string()],
            compare_columns: None,
            chunk_size: 1000,
            float_tolerance: 1e-9,
        }
    }
}

/// Performs row-level reconciliation over one source/target cursor pair.
pub struct RowLevelReconciler<'a> {
    source: &'a mut (dyn QueryExecutor + Send),
    target: &'a mut (dyn QueryExecutor + Send),
    options: RowLevelOptions,
    retry: &'a Retry,
}

impl<'a> RowLevelReconciler<'a> {
    pub fn new(
        source: &'a mut (dyn QueryExecutor + Send),
        target: &'a mut (dyn QueryExecutor + Send),
        options: RowLevelOptions,
        retry: &'a Retry,
    ) -> Self {
        Self {
            source,
            target,
            options,
            retry,
        }
    }

    /// Enumerate every row-level discrepancy between the two tables.
    pub async fn reconcile_table(
        &mut self,
        source_table: &str,
        target_table: &str,
    ) -> Result<Vec<RowDiscrepancy>> {
        let span = tracing::info_span!(
            "row_level_reconcile_table",
            source_table = %source_table,
            target_table = %target_table,
        );

        async {
            self.guard_table_size(Side::Source, source_table).await?;
            self.guard_table_size(Side::Target, target_table).await?;

            let source_pks =
                load_primary_keys(self.source, source_table, &self.options, self.retry).await?;
            let target_pks =
                load_primary_keys(self.target, target_table, &self.options, self.retry).await?;

            let mut missing: Vec<PkTuple> =
                source_pks.difference(&target_pks).cloned().collect();
            let mut extra: Vec<PkTuple> = target_pks.difference(&source_pks).cloned().collect();
            let mut common: Vec<PkTuple> =
                source_pks.intersection(&target_pks).cloned().collect();
            missing.sort();
            extra.sort();
            common.sort();

            info!(
                source_rows = source_pks.len(),
                target_rows = target_pks.len(),
                missing = missing.len(),
                extra = extra.len(),
                common = common.len(),
                "primary key set algebra complete"
            );

            let mut discrepancies = Vec::new();

            let missing_rows = fetch_rows(
                self.source,
                source_table,
                &missing,
                &self.options,
                self.retry,
            )
            .await?;
            for key in &missing {
                discrepancies.push(RowDiscrepancy {
                    table: target_table.to_string(),
                    primary_key: pk_to_row_data(&self.options.pk_columns, key),
                    kind: DiscrepancyKind::Missing,
                    source_row: missing_rows.get(key).cloned(),
                    target_row: None,
                    modified_columns: None,
                    timestamp: Utc::now(),
                });
                metrics::ROW_LEVEL_DISCREPANCIES
                    .with_label_values(&[target_table, "MISSING"])
                    .inc();
            }

            let extra_rows = fetch_rows(
                self.target,
                target_table,
                &extra,
                &self.options,
                self.retry,
            )
            .await?;
            for key in &extra {
                discrepancies.push(RowDiscrepancy {
                    table: target_table.to_string(),
                    primary_key: pk_to_row_data(&self.options.pk_columns, key),
                    kind: DiscrepancyKind::Extra,
                    source_row: None,
                    target_row: extra_rows.get(key).cloned(),
                    modified_columns: None,
                    timestamp: Utc::now(),
                });
                metrics::ROW_LEVEL_DISCREPANCIES
                    .with_label_values(&[target_table, "EXTRA"])
                    .inc();
            }

            let source_common = fetch_rows(
                self.source,
                source_table,
                &common,
                &self.options,
                self.retry,
            )
            .await?;
            let target_common = fetch_rows(
                self.target,
                target_table,
                &common,
                &self.options,
                self.retry,
            )
            .await?;

            let mut modified_count = 0usize;
            for key in &common {
                let (Some(source_row), Some(target_row)) =
                    (source_common.get(key), target_common.get(key))
                else {
                    continue;
                };

                let changed = compare_rows(source_row, target_row, &self.options);
                if !changed.is_empty() {
                    discrepancies.push(RowDiscrepancy {
                        table: target_table.to_string(),
                        primary_key: pk_to_row_data(&self.options.pk_columns, key),
                        kind: DiscrepancyKind::Modified,
                        source_row: Some(source_row.clone()),
                        target_row: Some(target_row.clone()),
                        modified_columns: Some(changed),
                        timestamp: Utc::now(),
                    });
                    modified_count += 1;
                    metrics::ROW_LEVEL_DISCREPANCIES
                        .with_label_values(&[target_table, "MODIFIED"])
                        .inc();
                }
            }

            info!(
                total = discrepancies.len(),
                missing = missing.len(),
                extra = extra.len(),
                modified = modified_count,
                "row-level reconciliation complete"
            );

            Ok(discrepancies)
        }
        .instrument(span)
        .await
    }

    async fn guard_table_size(&mut self, side: Side, table: &str) -> Result<()> {
        let executor = match side {
            Side::Source => &mut *self.source,
            Side::Target => &mut *self.target,
        };
        let count = get_row_count(executor, table, self.retry).await?;
        if count > MAX_PK_ROWS {
            return Err(ReconcileError::RowSetTooLarge {
                table: table.to_string(),
                rows: count as u64,
                limit: MAX_PK_ROWS as u64,
            });
        }
        Ok(())
    }
}

enum Side {
    Source,
    Target,
}

fn pk_to_row_data(pk_columns: &[String], key: &PkTuple) -> RowData {
    RowData(
        pk_columns
            .iter()
            .cloned()
            .zip(key.iter().cloned())
            .collect(),
    )
}

fn row_to_data(row: &crate::db::SqlRow) -> RowData {
    RowData(
        row.columns()
            .iter()
            .cloned()
            .zip(row.values().iter().cloned())
            .collect(),
    )
}

fn extract_key(row: &crate::db::SqlRow, pk_columns: &[String]) -> PkTuple {
    pk_columns
        .iter()
        .map(|col| row.get(col).cloned().unwrap_or(SqlValue::Null))
        .collect()
}

/// Columns selected for row fetches: the primary key plus the compare set,
/// or everything when no compare set was given.
fn select_column_list(options: &RowLevelOptions, dialect: Dialect) -> Result<String> {
    match &options.compare_columns {
        None => Ok("*".to_string()),
        Some(compare) => {
            let mut columns = options.pk_columns.clone();
            for col in compare {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
            }
            Ok(sql::quote_columns(&columns, dialect)?.join(", "))
        }
    }
}

async fn load_primary_keys(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    options: &RowLevelOptions,
    retry: &Retry,
) -> Result<HashSet<PkTuple>> {
    let dialect = executor.dialect();
    let quoted_table = sql::quote_schema_table(table, dialect)?;
    let pk_cols = sql::quote_columns(&options.pk_columns, dialect)?.join(", ");
    let query = format!("SELECT {pk_cols} FROM {quoted_table}");

    let mut conn = WithRetry::new(executor, retry);
    let rows = conn.query(&query, &[]).await?;
    let pks: HashSet<PkTuple> = rows.iter().map(|row| row.values().to_vec()).collect();
    debug!(table = %table, keys = pks.len(), "fetched primary keys");
    Ok(pks)
}

/// Fetch full rows for the given keys, keyed by primary-key tuple.
///
/// Single-column keys are fetched in `IN (...)` batches of `chunk_size`;
/// composite keys fall back to one equality query per key.
async fn fetch_rows(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    keys: &[PkTuple],
    options: &RowLevelOptions,
    retry: &Retry,
) -> Result<HashMap<PkTuple, RowData>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }

    let dialect = executor.dialect();
    let quoted_table = sql::quote_schema_table(table, dialect)?;
    let select_cols = select_column_list(options, dialect)?;
    let mut conn = WithRetry::new(executor, retry);
    let mut rows_by_key: HashMap<PkTuple, RowData> = HashMap::with_capacity(keys.len());

    if options.pk_columns.len() == 1 {
        let quoted_pk = sql::quote_identifier(&options.pk_columns[0], dialect)?;
        for batch in keys.chunks(options.chunk_size.max(1)) {
            let placeholders: Vec<String> =
                (0..batch.len()).map(|i| dialect.placeholder(i)).collect();
            let query = format!(
                "SELECT {select_cols} FROM {quoted_table} WHERE {quoted_pk} IN ({})",
                placeholders.join(", ")
            );
            let params: Vec<SqlValue> = batch.iter().map(|key| key[0].clone()).collect();

            for row in conn.query(&query, &params).await? {
                rows_by_key.insert(extract_key(&row, &options.pk_columns), row_to_data(&row));
            }
        }
    } else {
        let conditions = options
            .pk_columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                Ok(format!(
                    "{} = {}",
                    sql::quote_identifier(col, dialect)?,
                    dialect.placeholder(i)
                ))
            })
            .collect::<Result<Vec<_>>>()?
            .join(" AND ");
        let query = format!("SELECT {select_cols} FROM {quoted_table} WHERE {conditions}");

        for key in keys {
            if let Some(row) = conn.query(&query, key).await?.into_iter().next() {
                rows_by_key.insert(key.clone(), row_to_data(&row));
            }
        }
    }

    Ok(rows_by_key)
}

/// Column-by-column diff, ignoring primary-key columns.
fn compare_rows(source: &RowData, target: &RowData, options: &RowLevelOptions) -> Vec<String> {
    let mut modified = Vec::new();

    for (column, source_value) in source.iter() {
        if options.pk_columns.contains(column) {
            continue;
        }
        let target_value = target.get(column).unwrap_or(&SqlValue::Null);
        if !source_value.loosely_equals(target_value, options.float_tolerance) {
            modified.push(column.clone());
        }
    }

    modified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::stub::StubExecutor;

    fn options() -> RowLevelOptions {
        RowLevelOptions::default()
    }

    /// Scripts both executors for a drifted users table:
    /// source {1 John, 2 Jane, 3 Alice}, target {1 John, 2 Joan, 4 Bob}.
    fn users_scenario() -> (StubExecutor, StubExecutor) {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);

        // Size guards.
        source.push_scalar(SqlValue::Int(3));
        target.push_scalar(SqlValue::Int(3));

        // Primary key sets.
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
            vec![
                vec![SqlValue::Int(1)],
                vec![SqlValue::Int(2)],
                vec![SqlValue::Int(4)],
            ],
        );

        // Missing rows (source side, key 3).
        source.push_rows(
            &["id", "name"],
            vec![vec![SqlValue::Int(3), SqlValue::Text("Alice".into())]],
        );
        // Extra rows (target side, key 4).
        target.push_rows(
            &["id", "name"],
            vec![vec![SqlValue::Int(4), SqlValue::Text("Bob".into())]],
        );
        // Common rows, source then target (keys 1, 2 sorted).
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
                vec![SqlValue::Int(2), SqlValue::Text("Joan".into())],
            ],
        );

        (source, target)
    }

    #[tokio::test]
    async fn test_users_scenario_finds_all_three_kinds() {
        let (mut source, mut target) = users_scenario();
        let retry = Retry::default();
        let mut reconciler =
            RowLevelReconciler::new(&mut source, &mut target, options(), &retry);

        let discrepancies = reconciler.reconcile_table("users", "users").await.unwrap();

        assert_eq!(discrepancies.len(), 3);

        // Emission order: missing, extra, modified.
        assert_eq!(discrepancies[0].kind, DiscrepancyKind::Missing);
        assert_eq!(
            discrepancies[0].primary_key.get("id"),
            Some(&SqlValue::Int(3))
        );
        assert!(discrepancies[0].source_row.is_some());
        assert!(discrepancies[0].target_row.is_none());

        assert_eq!(discrepancies[1].kind, DiscrepancyKind::Extra);
        assert_eq!(
            discrepancies[1].primary_key.get("id"),
            Some(&SqlValue::Int(4))
        );

        assert_eq!(discrepancies[2].kind, DiscrepancyKind::Modified);
        assert_eq!(
            discrepancies[2].primary_key.get("id"),
            Some(&SqlValue::Int(2))
        );
        assert_eq!(
            discrepancies[2].modified_columns,
            Some(vec!["name".to_string()])
        );
    }

    #[tokio::test]
    async fn test_set_algebra_partition_sizes() {
        let (mut source, mut target) = users_scenario();
        let retry = Retry::default();
        let mut reconciler =
            RowLevelReconciler::new(&mut source, &mut target, options(), &retry);

        let discrepancies = reconciler.reconcile_table("users", "users").await.unwrap();

        let missing = discrepancies
            .iter()
            .filter(|d| d.kind == DiscrepancyKind::Missing)
            .count();
        let extra = discrepancies
            .iter()
            .filter(|d| d.kind == DiscrepancyKind::Extra)
            .count();
        // |Missing| + |Common| = |S| and |Extra| + |Common| = |T|
        let common = 2;
        assert_eq!(missing + common, 3);
        assert_eq!(extra + common, 3);
    }

    #[tokio::test]
    async fn test_identical_tables_produce_no_discrepancies() {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(1));
        target.push_scalar(SqlValue::Int(1));
        source.push_rows(&["id"], vec![vec![SqlValue::Int(1)]]);
        target.push_rows(&["id"], vec![vec![SqlValue::Int(1)]]);
        // No missing/extra fetches run on empty key sets; common fetch only.
        source.push_rows(
            &["id", "v"],
            vec![vec![SqlValue::Int(1), SqlValue::Float(0.5)]],
        );
        target.push_rows(
            &["id", "v"],
            vec![vec![SqlValue::Int(1), SqlValue::Float(0.5 + 1e-12)]],
        );

        let retry = Retry::default();
        let mut reconciler =
            RowLevelReconciler::new(&mut source, &mut target, options(), &retry);
        let discrepancies = reconciler.reconcile_table("users", "users").await.unwrap();
        assert!(discrepancies.is_empty());
    }

    #[tokio::test]
    async fn test_oversize_table_is_rejected() {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(MAX_PK_ROWS + 1));

        let retry = Retry::default();
        let mut reconciler =
            RowLevelReconciler::new(&mut source, &mut target, options(), &retry);
        let err = reconciler.reconcile_table("big", "big").await.unwrap_err();
        assert!(matches!(err, ReconcileError::RowSetTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_batched_fetch_uses_in_clause() {
        let (mut source, mut target) = users_scenario();
        let retry = Retry::default();
        let mut reconciler =
            RowLevelReconciler::new(&mut source, &mut target, options(), &retry);
        reconciler.reconcile_table("users", "users").await.unwrap();

        assert!(source
            .executed
            .iter()
            .any(|q| q.contains("WHERE [id] IN (@P1)")));
        assert!(target
            .executed
            .iter()
            .any(|q| q.contains("WHERE \"id\" IN ($1, $2)")));
    }

    #[tokio::test]
    async fn test_null_versus_value_is_modified() {
        let mut source = StubExecutor::new(Dialect::SqlServer);
        let mut target = StubExecutor::new(Dialect::Postgres);
        source.push_scalar(SqlValue::Int(1));
        target.push_scalar(SqlValue::Int(1));
        source.push_rows(&["id"], vec![vec![SqlValue::Int(1)]]);
        target.push_rows(&["id"], vec![vec![SqlValue::Int(1)]]);
        source.push_rows(
            &["id", "email"],
            vec![vec![SqlValue::Int(1), SqlValue::Null]],
        );
        target.push_rows(
            &["id", "email"],
            vec![vec![SqlValue::Int(1), SqlValue::Text("x@y".into())]],
        );

        let retry = Retry::default();
        let mut reconciler =
            RowLevelReconciler::new(&mut source, &mut target, options(), &retry);
        let discrepancies = reconciler.reconcile_table("users", "users").await.unwrap();

        assert_eq!(discrepancies.len(), 1);
        assert_eq!(
            discrepancies[0].modified_columns,
            Some(vec!["email".to_string()])
        );
    }
}
