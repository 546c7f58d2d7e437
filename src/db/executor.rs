//! Narrow capability interface over a database connection.
//!
//! The engine needs exactly four things from a connection: its dialect, a
//! collected query, a streamed query, and a scalar query. Each driver
//! implements this interface; nothing above this module touches a driver
//! type.

use async_trait::async_trait;

use crate::db::{Dialect, SqlRow, SqlValue};
use crate::error::Result;

/// Row-at-a-time view over a result set. Memory stays bounded to the
/// driver's wire buffer no matter how large the table is.
#[async_trait]
pub trait RowStream: Send {
    /// The next row, or `None` once the result set is drained.
    async fn next_row(&mut self) -> Result<Option<SqlRow>>;
}

/// The database operations the reconciliation engine uses.
#[async_trait]
pub trait QueryExecutor: Send {
    /// Dialect of the underlying connection, fixed at open time.
    fn dialect(&self) -> Dialect;

    /// Execute a query and collect all rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Execute a query and stream rows without buffering the result set.
    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Box<dyn RowStream + 'a>>;

    /// Execute a query expected to yield at most one single-column row.
    async fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>> {
        let rows = self.query(sql, params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.values().first().cloned()))
    }
}
