//! Safe SQL identifier handling.
//!
//! Validation and quoting are the only path by which an identifier enters a
//! query string. Values never travel here; they are bound as parameters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::Dialect;
use crate::error::{ReconcileError, Result};

static VALID_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static VALID_SCHEMA_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap());

/// Validate a single SQL identifier (table, schema, or column name).
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || !VALID_IDENTIFIER.is_match(identifier) {
        return Err(ReconcileError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}

/// Validate a `name` or `schema.name` identifier.
pub fn validate_schema_table(schema_table: &str) -> Result<()> {
    if schema_table.is_empty() || !VALID_SCHEMA_TABLE.is_match(schema_table) {
        return Err(ReconcileError::InvalidIdentifier(schema_table.to_string()));
    }
    Ok(())
}

/// Strip SQL Server style surrounding brackets from each dot-separated part.
///
/// Operators paste names like `[dbo].[customers]`; the bare parts are
/// re-validated and re-quoted in the current dialect afterwards.
fn strip_brackets(input: &str) -> String {
    input
        .split('.')
        .map(|part| {
            part.strip_prefix('[')
                .and_then(|p| p.strip_suffix(']'))
                .unwrap_or(part)
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Validate and quote a single identifier for the given dialect.
pub fn quote_identifier(identifier: &str, dialect: Dialect) -> Result<String> {
    let bare = strip_brackets(identifier);
    validate_identifier(&bare)?;
    Ok(dialect.quote(&bare))
}

/// Validate and quote a `name` or `schema.name` identifier for the given
/// dialect. Each part is quoted separately: `"schema"."table"` on Postgres,
/// `[schema].[table]` on SQL Server.
pub fn quote_schema_table(schema_table: &str, dialect: Dialect) -> Result<String> {
    let bare = strip_brackets(schema_table);
    validate_schema_table(&bare)?;

    Ok(bare
        .split('.')
        .map(|part| dialect.quote(part))
        .collect::<Vec<_>>()
        .join("."))
}

/// Quote a list of column names, preserving order.
pub fn quote_columns(columns: &[String], dialect: Dialect) -> Result<Vec<String>> {
    columns
        .iter()
        .map(|c| quote_identifier(c, dialect))
        .collect()
}
