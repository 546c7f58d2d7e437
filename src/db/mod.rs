//! Database access layer.
//!
//! Dialect rules, the driver-agnostic value model, the narrow
//! [`QueryExecutor`] capability interface, per-driver connectors, and
//! bounded connection pools.

mod dialect;
pub mod executor;
pub mod pool;
mod postgres;
mod sqlserver;
mod value;

pub use dialect::Dialect;
pub use executor::{QueryExecutor, RowStream};
pub use pool::{ConnectionPool, Connector, PoolConfig, PooledConnection};
pub use postgres::{PgConnector, PgExecutor};
pub use sqlserver::{MssqlConnector, MssqlExecutor};
pub use value::{SqlRow, SqlValue};
