//! PostgreSQL connector built on tokio-postgres.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::TryStreamExt;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, warn};

use crate::config::PostgresConfig;
use crate::db::executor::{QueryExecutor, RowStream};
use crate::db::{Dialect, SqlRow, SqlValue};
use crate::error::{DbError, Result};

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            // Integers narrow to the column's width so bound parameters
            // match int2/int4 primary keys.
            SqlValue::Int(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            SqlValue::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlValue::Decimal(d) => d.to_sql(ty, out),
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Bytes(b) => b.to_sql(ty, out),
            SqlValue::Timestamp(ts) => ts.to_sql(ty, out),
            SqlValue::TimestampTz(ts) => ts.to_sql(ty, out),
            SqlValue::Date(d) => d.to_sql(ty, out),
            SqlValue::Uuid(u) => u.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn decode_row(row: &tokio_postgres::Row, columns: &Arc<[String]>) -> Result<SqlRow> {
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i).map(|v| v.map(SqlValue::Bool))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)
                .map(|v| v.map(|x| SqlValue::Int(x.into())))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)
                .map(|v| v.map(|x| SqlValue::Int(x.into())))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i).map(|v| v.map(SqlValue::Int))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)
                .map(|v| v.map(|x| SqlValue::Float(x.into())))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i).map(|v| v.map(SqlValue::Float))
        } else if *ty == Type::NUMERIC {
            row.try_get::<_, Option<rust_decimal::Decimal>>(i)
                .map(|v| v.map(SqlValue::Decimal))
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            row.try_get::<_, Option<String>>(i).map(|v| v.map(SqlValue::Text))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i).map(|v| v.map(SqlValue::Bytes))
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<chrono::NaiveDateTime>>(i)
                .map(|v| v.map(SqlValue::Timestamp))
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                .map(|v| v.map(SqlValue::TimestampTz))
        } else if *ty == Type::DATE {
            row.try_get::<_, Option<chrono::NaiveDate>>(i)
                .map(|v| v.map(SqlValue::Date))
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<uuid::Uuid>>(i).map(|v| v.map(SqlValue::Uuid))
        } else {
            // Last resort: anything the driver can surface as text.
            row.try_get::<_, Option<String>>(i).map(|v| v.map(SqlValue::Text))
        };

        let value = value.map_err(|e| {
            DbError::Decode(format!(
                "column {} ({}): {e}",
                column.name(),
                ty.name()
            ))
        })?;
        values.push(value.unwrap_or(SqlValue::Null));
    }

    Ok(SqlRow::new(columns.clone(), values))
}

fn column_names(row: &tokio_postgres::Row) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// A live PostgreSQL connection. The background driver task is owned by the
/// executor and aborted when it drops.
pub struct PgExecutor {
    client: tokio_postgres::Client,
    driver: tokio::task::JoinHandle<()>,
}

impl PgExecutor {
    /// Open a connection using the target configuration.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.username)
            .password(&config.password)
            .connect_timeout(std::time::Duration::from_secs(30));

        let (client, connection) = pg.connect(NoTls).await.map_err(DbError::from)?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection task ended with error");
            }
        });

        debug!(host = %config.host, database = %config.database, "connected to postgres");
        Ok(Self { client, driver })
    }
}

impl Drop for PgExecutor {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Pool connector dialing the configured PostgreSQL target.
pub struct PgConnector {
    config: PostgresConfig,
}

impl PgConnector {
    pub fn new(config: PostgresConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl crate::db::pool::Connector for PgConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn connect(&self) -> Result<Box<dyn QueryExecutor + Send>> {
        Ok(Box::new(PgExecutor::connect(&self.config).await?))
    }
}

struct PgRowStream {
    inner: Pin<Box<tokio_postgres::RowStream>>,
    columns: Option<Arc<[String]>>,
}

#[async_trait]
impl RowStream for PgRowStream {
    async fn next_row(&mut self) -> Result<Option<SqlRow>> {
        match self.inner.try_next().await.map_err(DbError::from)? {
            Some(row) => {
                let columns = self
                    .columns
                    .get_or_insert_with(|| column_names(&row))
                    .clone();
                Ok(Some(decode_row(&row, &columns)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let borrowed: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(sql, &borrowed)
            .await
            .map_err(DbError::from)?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns = column_names(first);
        rows.iter().map(|row| decode_row(row, &columns)).collect()
    }

    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Box<dyn RowStream + 'a>> {
        let stream = self
            .client
            .query_raw(sql, params.iter())
            .await
            .map_err(DbError::from)?;

        Ok(Box::new(PgRowStream {
            inner: Box::pin(stream),
            columns: None,
        }))
    }
}
