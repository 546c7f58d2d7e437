//! Repair script generation.
//!
//! Turns a discrepancy list into a transactional DML script in the target
//! dialect. The engine never executes the script; running it is the
//! operator's call.

use chrono::Utc;

use crate::db::{Dialect, SqlValue};
use crate::models::{DiscrepancyKind, RowData, RowDiscrepancy};

/// Render a value as a SQL literal for the given dialect.
fn format_literal(value: &SqlValue, dialect: Dialect) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => match dialect {
            Dialect::Postgres => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Dialect::SqlServer => if *b { "1" } else { "0" }.to_string(),
        },
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Decimal(d) => d.normalize().to_string(),
        SqlValue::Text(s) => quote_string(s),
        SqlValue::Bytes(b) => match dialect {
            Dialect::Postgres => format!("'\\x{}'", hex::encode(b)),
            Dialect::SqlServer => format!("0x{}", hex::encode(b)),
        },
        SqlValue::Timestamp(ts) => match dialect {
            Dialect::Postgres => format!("'{}'", ts.format("%Y-%m-%dT%H:%M:%S%.6f")),
            Dialect::SqlServer => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
        },
        SqlValue::TimestampTz(ts) => match dialect {
            Dialect::Postgres => format!("'{}'", ts.to_rfc3339()),
            Dialect::SqlServer => {
                format!("'{}'", ts.naive_utc().format("%Y-%m-%d %H:%M:%S"))
            }
        },
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::Uuid(u) => format!("'{u}'"),
    }
}

/// Single-quote a string, doubling embedded quotes.
fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn where_clause(pk: &RowData, dialect: Dialect) -> String {
    pk.iter()
        .map(|(col, value)| format!("{} = {}", dialect.quote(col), format_literal(value, dialect)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn pk_comment(pk: &RowData) -> String {
    pk.iter()
        .map(|(col, value)| format!("{col}={}", value.encode()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_statement(table: &str, row: &RowData, dialect: Dialect) -> String {
    if row.is_empty() {
        return "-- Cannot generate INSERT: no row data".to_string();
    }

    let columns: Vec<String> = row.iter().map(|(col, _)| dialect.quote(col)).collect();
    let values: Vec<String> = row
        .iter()
        .map(|(_, value)| format_literal(value, dialect))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        table,
        columns.join(", "),
        values.join(", ")
    )
}

fn delete_statement(table: &str, pk: &RowData, dialect: Dialect) -> String {
    if pk.is_empty() {
        return "-- Cannot generate DELETE: no primary key".to_string();
    }
    format!("DELETE FROM {} WHERE {};", table, where_clause(pk, dialect))
}

fn update_statement(
    table: &str,
    pk: &RowData,
    source_row: &RowData,
    modified_columns: &[String],
    dialect: Dialect,
) -> String {
    if pk.is_empty() || modified_columns.is_empty() {
        return "-- Cannot generate UPDATE: no primary key or modified columns".to_string();
    }

    let assignments: Vec<String> = modified_columns
        .iter()
        .map(|col| {
            let value = source_row.get(col).unwrap_or(&SqlValue::Null);
            format!("{} = {}", dialect.quote(col), format_literal(value, dialect))
        })
        .collect();

    format!(
        "UPDATE {} SET {} WHERE {};",
        table,
        assignments.join(", "),
        where_clause(pk, dialect)
    )
}

/// Generate the full transactional repair script for one table.
pub fn generate_repair_script(
    discrepancies: &[RowDiscrepancy],
    target_table: &str,
    dialect: Dialect,
) -> crate::error::Result<String> {
    let quoted_table = crate::sql::quote_schema_table(target_table, dialect)?;

    let mut lines = vec![
        format!("-- Repair script for {target_table}"),
        format!("-- Generated: {}", Utc::now().to_rfc3339()),
        format!("-- Total discrepancies: {}", discrepancies.len()),
        format!("-- Database type: {}", dialect.name()),
        String::new(),
    ];

    lines.push(match dialect {
        Dialect::Postgres => "BEGIN;".to_string(),
        Dialect::SqlServer => "BEGIN TRANSACTION;".to_string(),
    });
    lines.push(String::new());

    let missing: Vec<_> = discrepancies
        .iter()
        .filter(|d| d.kind == DiscrepancyKind::Missing)
        .collect();
    let extra: Vec<_> = discrepancies
        .iter()
        .filter(|d| d.kind == DiscrepancyKind::Extra)
        .collect();
    let modified: Vec<_> = discrepancies
        .iter()
        .filter(|d| d.kind == DiscrepancyKind::Modified)
        .collect();

    if !missing.is_empty() {
        lines.push(format!("-- Insert {} missing rows", missing.len()));
        lines.push(String::new());
        for disc in missing {
            lines.push(format!("-- Missing row: {}", pk_comment(&disc.primary_key)));
            match &disc.source_row {
                Some(row) => lines.push(insert_statement(&quoted_table, row, dialect)),
                None => lines.push("-- Cannot generate INSERT: no row data".to_string()),
            }
            lines.push(String::new());
        }
    }

    if !extra.is_empty() {
        lines.push(format!("-- Delete {} extra rows", extra.len()));
        lines.push(String::new());
        for disc in extra {
            lines.push(format!("-- Extra row: {}", pk_comment(&disc.primary_key)));
            lines.push(delete_statement(&quoted_table, &disc.primary_key, dialect));
            lines.push(String::new());
        }
    }

    if !modified.is_empty() {
        lines.push(format!("-- Update {} modified rows", modified.len()));
        lines.push(String::new());
        for disc in modified {
            let columns = disc.modified_columns.clone().unwrap_or_default();
            lines.push(format!("-- Modified row: {}", pk_comment(&disc.primary_key)));
            lines.push(format!("-- Modified columns: {}", columns.join(", ")));
            match &disc.source_row {
                Some(row) => lines.push(update_statement(
                    &quoted_table,
                    &disc.primary_key,
                    row,
                    &columns,
                    dialect,
                )),
                None => {
                    lines.push("-- Cannot generate UPDATE: no row data".to_string());
                }
            }
            lines.push(String::new());
        }
    }

    lines.push("COMMIT;".to_string());
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn discrepancy(
        kind: DiscrepancyKind,
        id: i64,
        source_row: Option<RowData>,
        target_row: Option<RowData>,
        modified: Option<Vec<String>>,
    ) -> RowDiscrepancy {
        RowDiscrepancy {
            table: "users".to_string(),
            primary_key: RowData(vec![("id".to_string(), SqlValue::Int(id))]),
            kind,
            source_row,
            target_row,
            modified_columns: modified,
            timestamp: Utc::now(),
        }
    }

    fn user_row(id: i64, name: &str) -> RowData {
        RowData(vec![
            ("id".to_string(), SqlValue::Int(id)),
            ("name".to_string(), SqlValue::Text(name.to_string())),
        ])
    }

    #[test]
    fn test_full_script_shape() {
        let discrepancies = vec![
            discrepancy(DiscrepancyKind::Missing, 3, Some(user_row(3, "Alice")), None, None),
            discrepancy(DiscrepancyKind::Extra, 4, None, Some(user_row(4, "Bob")), None),
            discrepancy(
                DiscrepancyKind::Modified,
                2,
                Some(user_row(2, "Jane")),
                Some(user_row(2, "Joan")),
                Some(vec!["name".to_string()]),
            ),
        ];

        let script = generate_repair_script(&discrepancies, "users", Dialect::Postgres).unwrap();

        assert!(script.starts_with("-- Repair script for users"));
        assert!(script.contains("-- Total discrepancies: 3"));
        assert!(script.contains("BEGIN;"));
        assert!(script.trim_end().ends_with("COMMIT;"));
        assert!(script.contains("INSERT INTO \"users\" (\"id\", \"name\") VALUES (3, 'Alice');"));
        assert!(script.contains("DELETE FROM \"users\" WHERE \"id\" = 4;"));
        assert!(script.contains("UPDATE \"users\" SET \"name\" = 'Jane' WHERE \"id\" = 2;"));
    }

    #[test]
    fn test_sqlserver_transaction_wrapper() {
        let discrepancies = vec![discrepancy(
            DiscrepancyKind::Extra,
            1,
            None,
            Some(user_row(1, "X")),
            None,
        )];
        let script =
            generate_repair_script(&discrepancies, "dbo.users", Dialect::SqlServer).unwrap();
        assert!(script.contains("BEGIN TRANSACTION;"));
        assert!(script.contains("DELETE FROM [dbo].[users] WHERE [id] = 1;"));
    }

    #[test]
    fn test_string_literals_escape_quotes() {
        let script = generate_repair_script(
            &[discrepancy(
                DiscrepancyKind::Missing,
                1,
                Some(RowData(vec![
                    ("id".to_string(), SqlValue::Int(1)),
                    ("name".to_string(), SqlValue::Text("O'Brien".into())),
                ])),
                None,
                None,
            )],
            "users",
            Dialect::Postgres,
        )
        .unwrap();
        assert!(script.contains("'O''Brien'"));
    }

    #[test]
    fn test_boolean_literals_by_dialect() {
        let row = RowData(vec![
            ("id".to_string(), SqlValue::Int(1)),
            ("active".to_string(), SqlValue::Bool(true)),
        ]);
        let pg = generate_repair_script(
            &[discrepancy(DiscrepancyKind::Missing, 1, Some(row.clone()), None, None)],
            "users",
            Dialect::Postgres,
        )
        .unwrap();
        let ms = generate_repair_script(
            &[discrepancy(DiscrepancyKind::Missing, 1, Some(row), None, None)],
            "users",
            Dialect::SqlServer,
        )
        .unwrap();
        assert!(pg.contains("VALUES (1, TRUE)"));
        assert!(ms.contains("VALUES (1, 1)"));
    }

    #[test]
    fn test_null_literal() {
        let script = generate_repair_script(
            &[discrepancy(
                DiscrepancyKind::Missing,
                1,
                Some(RowData(vec![
                    ("id".to_string(), SqlValue::Int(1)),
                    ("email".to_string(), SqlValue::Null),
                ])),
                None,
                None,
            )],
            "users",
            Dialect::Postgres,
        )
        .unwrap();
        assert!(script.contains("VALUES (1, NULL)"));
    }

    #[test]
    fn test_injection_in_table_name_rejected() {
        assert!(generate_repair_script(&[], "users; DROP TABLE x--", Dialect::Postgres).is_err());
    }
}
