//! Row-count side of the comparator.

use tracing::Instrument;

use crate::db::{QueryExecutor, SqlValue};
use crate::error::{DbError, Result};
use crate::retry::{Retry, WithRetry};
use crate::sql;

/// `SELECT COUNT(*)` for one table, wrapped in the retry policy.
pub async fn get_row_count(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    retry: &Retry,
) -> Result<i64> {
    let quoted = sql::quote_schema_table(table, executor.dialect())?;
    let query = format!("SELECT COUNT(*) FROM {quoted}");
    let span = tracing::info_span!("db.count", table = %table);

    async {
        let mut conn = WithRetry::new(executor, retry);
        match conn.query_scalar(&query, &[]).await? {
            Some(SqlValue::Int(count)) => Ok(count),
            other => Err(DbError::Decode(format!("COUNT(*) returned {other:?}")).into()),
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::stub::StubExecutor;
    use crate::db::Dialect;

    #[tokio::test]
    async fn test_row_count_query_shape() {
        let mut executor = StubExecutor::new(Dialect::SqlServer);
        executor.push_scalar(SqlValue::Int(1000));

        let count = get_row_count(&mut executor, "dbo.customers", &Retry::default())
            .await
            .unwrap();

        assert_eq!(count, 1000);
        assert_eq!(
            executor.executed,
            vec!["SELECT COUNT(*) FROM [dbo].[customers]"]
        );
    }

    #[tokio::test]
    async fn test_row_count_rejects_bad_identifier() {
        let mut executor = StubExecutor::new(Dialect::Postgres);
        let err = get_row_count(&mut executor, "users; DROP TABLE x--", &Retry::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ReconcileError::InvalidIdentifier(_)));
        assert!(executor.executed.is_empty(), "no query may reach the database");
    }
}
