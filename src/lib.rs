//! replicheck - data reconciliation for SQL Server to PostgreSQL CDC
//! pipelines.
//!
//! Compares each configured table pair between the source and target
//! databases by row count, checksum, and optionally row-by-row, producing
//! structured reports and idempotent repair scripts. The engine never
//! writes to either database.

pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod sql;
pub mod vault;

pub use error::{ReconcileError, Result};
