//! Error taxonomy for the reconciliation engine.
//!
//! Data-level mismatches are never errors; they are carried in result
//! records. This module covers infrastructure failures only.

use thiserror::Error;

/// Driver-level database error, unified across both backends.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("sqlserver: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// A cell value the engine could not map into its value model.
    #[error("column decode: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(
        "invalid SQL identifier {0:?}: only ASCII letters, digits, and underscores are allowed, \
         starting with a letter or underscore"
    )]
    InvalidIdentifier(String),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("connection pool for {db} exhausted after waiting {waited_secs:.1}s")]
    PoolExhausted { db: &'static str, waited_secs: f64 },

    #[error("table {table} exceeded the per-table deadline of {seconds}s")]
    Timeout { table: String, seconds: u64 },

    #[error(
        "primary key set for {table} holds {rows} rows, above the row-level limit of {limit}"
    )]
    RowSetTooLarge { table: String, rows: u64, limit: u64 },

    #[error("row counts cannot be negative: source={source_count}, target={target_count}")]
    NegativeCount { source_count: i64, target_count: i64 },

    #[error("reconciliation aborted: {failed} table(s) failed; first failure on {table}: {error}")]
    Aborted {
        failed: usize,
        table: String,
        error: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("secret store error: {0}")]
    Vault(String),

    #[error("usage error: {0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
