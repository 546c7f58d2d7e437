//! Table checksums.
//!
//! A checksum is the SHA-256 of the concatenated per-row encoding, ordered
//! by primary key so both databases hash rows in the same sequence. The full
//! variant streams one ordered result set; the chunked variant pages through
//! the table and holds at most one page in memory.

use sha2::{Digest, Sha256};
use tracing::{debug, warn, Instrument};

use crate::db::{Dialect, QueryExecutor, SqlValue};
use crate::error::{ReconcileError, Result};
use crate::retry::{Retry, WithRetry};
use crate::sql;

/// Default page size for chunked checksums.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Split a `schema.table` name, applying the dialect's default schema.
fn schema_and_table(table: &str, dialect: Dialect) -> (String, String) {
    let bare: String = table.chars().filter(|c| *c != '[' && *c != ']').collect();
    match bare.split_once('.') {
        Some((schema, name)) => (schema.to_string(), name.to_string()),
        None => {
            let default_schema = match dialect {
                Dialect::Postgres => "public",
                Dialect::SqlServer => "dbo",
            };
            (default_schema.to_string(), bare)
        }
    }
}

/// First primary-key column from the system catalog, or `None` when the
/// table has no primary key (or the lookup itself fails).
pub async fn discover_primary_key(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
) -> Result<Option<String>> {
    let dialect = executor.dialect();
    let (schema, name) = schema_and_table(table, dialect);

    let lookup = match dialect {
        Dialect::Postgres => {
            let query = "SELECT a.attname \
                 FROM pg_index i \
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
                 WHERE i.indrelid = $1::regclass AND i.indisprimary \
                 LIMIT 1";
            executor
                .query(query, &[SqlValue::Text(format!("{schema}.{name}"))])
                .await
        }
        Dialect::SqlServer => {
            let query = "SELECT c.name \
                 FROM sys.indexes i \
                 JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
                 JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
                 WHERE i.is_primary_key = 1 \
                 AND OBJECT_NAME(i.object_id) = @P1 \
                 AND SCHEMA_NAME(OBJECTPROPERTY(i.object_id, 'SchemaId')) = @P2 \
                 ORDER BY ic.key_ordinal";
            executor
                .query(query, &[SqlValue::Text(name), SqlValue::Text(schema)])
                .await
        }
    };

    match lookup {
        Ok(rows) => Ok(rows.first().and_then(|row| match row.values().first() {
            Some(SqlValue::Text(pk)) => Some(pk.clone()),
            _ => None,
        })),
        Err(e) => {
            warn!(table = %table, error = %e, "primary key lookup failed, falling back to ordinal order");
            Ok(None)
        }
    }
}

/// Quoted primary-key column for `ORDER BY`, or ordinal position 1.
async fn order_column(executor: &mut (dyn QueryExecutor + Send), table: &str) -> Result<String> {
    let dialect = executor.dialect();
    match discover_primary_key(executor, table).await? {
        Some(pk) => sql::quote_identifier(&pk, dialect),
        None => Ok("1".to_string()),
    }
}

fn column_list(columns: Option<&[String]>, dialect: Dialect) -> Result<String> {
    match columns {
        Some(cols) if !cols.is_empty() => Ok(sql::quote_columns(cols, dialect)?.join(", ")),
        _ => Ok("*".to_string()),
    }
}

/// Full checksum: one ordered result set streamed through a single hasher.
///
/// An empty table hashes to the SHA-256 of the empty string.
pub async fn calculate_checksum(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    columns: Option<&[String]>,
) -> Result<String> {
    let (digest, _rows) = checksum_with_count(executor, table, columns).await?;
    Ok(digest)
}

/// Full checksum plus the number of rows hashed.
pub(crate) async fn checksum_with_count(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    columns: Option<&[String]>,
) -> Result<(String, u64)> {
    let dialect = executor.dialect();
    let quoted = sql::quote_schema_table(table, dialect)?;
    let cols = column_list(columns, dialect)?;
    let order = order_column(executor, table).await?;
    let query = format!("SELECT {cols} FROM {quoted} ORDER BY {order}");

    let span = tracing::info_span!("calculate_checksum", table = %table, mode = "full");
    async {
        let mut hasher = Sha256::new();
        let mut rows: u64 = 0;

        let mut stream = executor.query_stream(&query, &[]).await?;
        while let Some(row) = stream.next_row().await? {
            hasher.update(row.encode().as_bytes());
            rows += 1;
            if rows % 100_000 == 0 {
                debug!(table = %table, rows, "checksum progress");
            }
        }

        Ok((hex::encode(hasher.finalize()), rows))
    }
    .instrument(span)
    .await
}

/// Chunked checksum: same digest as the full variant, fetched in pages of
/// `chunk_size` ordered by the discovered primary key. Each page fetch runs
/// under the retry policy; memory stays bounded to one page.
pub async fn calculate_checksum_chunked(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    columns: Option<&[String]>,
    chunk_size: usize,
    retry: &Retry,
) -> Result<String> {
    if chunk_size == 0 {
        return Err(ReconcileError::Usage(
            "checksum chunk size must be positive".to_string(),
        ));
    }

    let dialect = executor.dialect();
    let quoted = sql::quote_schema_table(table, dialect)?;
    let cols = column_list(columns, dialect)?;
    let order = order_column(executor, table).await?;

    let span = tracing::info_span!("calculate_checksum", table = %table, mode = "chunked");
    async {
        let mut conn = WithRetry::new(executor, retry);
        let mut hasher = Sha256::new();
        let mut offset: usize = 0;
        let mut total_rows: u64 = 0;

        loop {
            let page_clause = dialect.pagination(chunk_size, offset);
            let query = format!("SELECT {cols} FROM {quoted} ORDER BY {order} {page_clause}");
            let rows = conn.query(&query, &[]).await?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                hasher.update(row.encode().as_bytes());
            }
            total_rows += rows.len() as u64;
            offset += rows.len();
            debug!(table = %table, rows = total_rows, "chunked checksum progress");

            if rows.len() < chunk_size {
                break;
            }
        }

        debug!(table = %table, rows = total_rows, "chunked checksum complete");
        Ok(hex::encode(hasher.finalize()))
    }
    .instrument(span)
    .await
}
