//! SQL Server connector built on tiberius.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, QueryItem, QueryStream};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::config::SqlServerConfig;
use crate::db::executor::{QueryExecutor, RowStream};
use crate::db::{Dialect, SqlRow, SqlValue};
use crate::error::{DbError, Result};

impl tiberius::ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::I32(None),
            SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
            SqlValue::Int(i) => ColumnData::I64(Some(*i)),
            SqlValue::Float(f) => ColumnData::F64(Some(*f)),
            SqlValue::Decimal(d) => tiberius::ToSql::to_sql(d),
            SqlValue::Text(s) => ColumnData::String(Some(s.as_str().into())),
            SqlValue::Bytes(b) => ColumnData::Binary(Some(b.as_slice().into())),
            SqlValue::Timestamp(ts) => tiberius::ToSql::to_sql(ts),
            SqlValue::TimestampTz(ts) => tiberius::ToSql::to_sql(ts),
            SqlValue::Date(d) => tiberius::ToSql::to_sql(d),
            SqlValue::Uuid(u) => ColumnData::Guid(Some(*u)),
        }
    }
}

fn decode_value(data: &ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::U8(v) => v.map(|x| SqlValue::Int(x.into())),
        ColumnData::I16(v) => v.map(|x| SqlValue::Int(x.into())),
        ColumnData::I32(v) => v.map(|x| SqlValue::Int(x.into())),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|x| SqlValue::Float(x.into())),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Numeric(_) => {
            <rust_decimal::Decimal as tiberius::FromSql>::from_sql(data)
                .map_err(DbError::from)?
                .map(SqlValue::Decimal)
        }
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            <chrono::NaiveDateTime as tiberius::FromSql>::from_sql(data)
                .map_err(DbError::from)?
                .map(SqlValue::Timestamp)
        }
        ColumnData::DateTimeOffset(_) => {
            <chrono::DateTime<chrono::Utc> as tiberius::FromSql>::from_sql(data)
                .map_err(DbError::from)?
                .map(SqlValue::TimestampTz)
        }
        ColumnData::Date(_) => <chrono::NaiveDate as tiberius::FromSql>::from_sql(data)
            .map_err(DbError::from)?
            .map(SqlValue::Date),
        other => {
            return Err(
                DbError::Decode(format!("unsupported sqlserver column data: {other:?}")).into(),
            )
        }
    };

    Ok(value.unwrap_or(SqlValue::Null))
}

fn decode_row(row: tiberius::Row) -> Result<SqlRow> {
    let columns: Arc<[String]> = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values = row
        .into_iter()
        .map(|data| decode_value(&data))
        .collect::<Result<Vec<_>>>()?;

    Ok(SqlRow::new(columns, values))
}

/// A live SQL Server connection.
pub struct MssqlExecutor {
    client: Client<Compat<TcpStream>>,
}

impl MssqlExecutor {
    /// Open a connection using the source configuration.
    pub async fn connect(config: &SqlServerConfig) -> Result<Self> {
        let mut tib = tiberius::Config::new();
        tib.host(&config.server);
        tib.port(config.port);
        tib.database(&config.database);
        tib.authentication(AuthMethod::sql_server(&config.username, &config.password));
        if config.trust_cert {
            tib.trust_cert();
        }

        let tcp = TcpStream::connect(tib.get_addr()).await?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(tib, tcp.compat_write())
            .await
            .map_err(DbError::from)?;

        debug!(server = %config.server, database = %config.database, "connected to sqlserver");
        Ok(Self { client })
    }
}

/// Pool connector dialing the configured SQL Server source.
pub struct MssqlConnector {
    config: SqlServerConfig,
}

impl MssqlConnector {
    pub fn new(config: SqlServerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl crate::db::pool::Connector for MssqlConnector {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn connect(&self) -> Result<Box<dyn QueryExecutor + Send>> {
        Ok(Box::new(MssqlExecutor::connect(&self.config).await?))
    }
}

struct MssqlRowStream<'a> {
    inner: QueryStream<'a>,
}

#[async_trait]
impl<'a> RowStream for MssqlRowStream<'a> {
    async fn next_row(&mut self) -> Result<Option<SqlRow>> {
        while let Some(item) = self.inner.try_next().await.map_err(DbError::from)? {
            if let QueryItem::Row(row) = item {
                return Ok(Some(decode_row(row)?));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl QueryExecutor for MssqlExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let borrowed: Vec<&dyn tiberius::ToSql> =
            params.iter().map(|p| p as &dyn tiberius::ToSql).collect();
        let stream = self
            .client
            .query(sql, &borrowed)
            .await
            .map_err(DbError::from)?;

        let rows = stream.into_first_result().await.map_err(DbError::from)?;
        rows.into_iter().map(decode_row).collect()
    }

    async fn query_stream<'a>(
        &'a mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Box<dyn RowStream + 'a>> {
        let borrowed: Vec<&dyn tiberius::ToSql> =
            params.iter().map(|p| p as &dyn tiberius::ToSql).collect();
        let stream = self
            .client
            .query(sql, &borrowed)
            .await
            .map_err(DbError::from)?;

        Ok(Box::new(MssqlRowStream { inner: stream }))
    }
}
