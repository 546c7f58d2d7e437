//! Cross-module checks for repair script emission and checksum state
//! persistence.

use chrono::Utc;
use replicheck::db::{Dialect, SqlValue};
use replicheck::engine::{generate_repair_script, ChecksumMode, ChecksumStateStore};
use replicheck::models::{DiscrepancyKind, RowData, RowDiscrepancy};

fn user_row(id: i64, name: &str) -> RowData {
    RowData(vec![
        ("id".to_string(), SqlValue::Int(id)),
        ("name".to_string(), SqlValue::Text(name.to_string())),
    ])
}

fn users_discrepancies() -> Vec<RowDiscrepancy> {
    vec![
        RowDiscrepancy {
            table: "users".to_string(),
            primary_key: RowData(vec![("id".to_string(), SqlValue::Int(3))]),
            kind: DiscrepancyKind::Missing,
            source_row: Some(user_row(3, "Alice")),
            target_row: None,
            modified_columns: None,
            timestamp: Utc::now(),
        },
        RowDiscrepancy {
            table: "users".to_string(),
            primary_key: RowData(vec![("id".to_string(), SqlValue::Int(4))]),
            kind: DiscrepancyKind::Extra,
            source_row: None,
            target_row: Some(user_row(4, "Bob")),
            modified_columns: None,
            timestamp: Utc::now(),
        },
        RowDiscrepancy {
            table: "users".to_string(),
            primary_key: RowData(vec![("id".to_string(), SqlValue::Int(2))]),
            kind: DiscrepancyKind::Modified,
            source_row: Some(user_row(2, "Jane")),
            target_row: Some(user_row(2, "Joan")),
            modified_columns: Some(vec!["name".to_string()]),
            timestamp: Utc::now(),
        },
    ]
}

#[test]
fn repair_script_covers_all_three_kinds_transactionally() {
    let script =
        generate_repair_script(&users_discrepancies(), "users", Dialect::Postgres).unwrap();

    let begin = script.find("BEGIN;").unwrap();
    let insert = script
        .find("INSERT INTO \"users\" (\"id\", \"name\") VALUES (3, 'Alice');")
        .unwrap();
    let delete = script.find("DELETE FROM \"users\" WHERE \"id\" = 4;").unwrap();
    let update = script
        .find("UPDATE \"users\" SET \"name\" = 'Jane' WHERE \"id\" = 2;")
        .unwrap();
    let commit = script.rfind("COMMIT;").unwrap();

    // Transaction wraps everything; statements appear insert, delete, update.
    assert!(begin < insert && insert < delete && delete < update && update < commit);

    // Each statement is preceded by a comment naming the primary key.
    assert!(script.contains("-- Missing row: id=3"));
    assert!(script.contains("-- Extra row: id=4"));
    assert!(script.contains("-- Modified row: id=2"));
    assert!(script.contains("-- Modified columns: name"));
}

#[test]
fn repair_script_header_describes_the_run() {
    let script =
        generate_repair_script(&users_discrepancies(), "users", Dialect::SqlServer).unwrap();

    assert!(script.starts_with("-- Repair script for users"));
    assert!(script.contains("-- Total discrepancies: 3"));
    assert!(script.contains("-- Database type: sqlserver"));
    assert!(script.contains("BEGIN TRANSACTION;"));
    assert!(script.contains("INSERT INTO [users] ([id], [name]) VALUES (3, 'Alice');"));
}

#[test]
fn state_store_round_trips_to_second_precision() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = ChecksumStateStore::new(dir.path().join("state")).unwrap();

    let now = Utc::now();
    store
        .save("dbo.customers", &"9".repeat(64), 123_456, ChecksumMode::Incremental, now)
        .unwrap();

    let reloaded = store.load("dbo.customers").unwrap();
    assert_eq!(reloaded.checksum, "9".repeat(64));
    assert_eq!(reloaded.row_count, 123_456);
    assert_eq!(reloaded.mode, ChecksumMode::Incremental);
    assert_eq!(reloaded.last_run.timestamp(), now.timestamp());
}

#[test]
fn state_store_separates_source_and_target_roles() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = ChecksumStateStore::new(dir.path().join("source")).unwrap();
    let target = ChecksumStateStore::new(dir.path().join("target")).unwrap();

    source
        .save("users", &"a".repeat(64), 10, ChecksumMode::Full, Utc::now())
        .unwrap();

    assert!(source.load("users").is_some());
    assert!(target.load("users").is_none());
    assert_eq!(source.list_tracked_tables(), vec!["users"]);
    assert!(target.list_tracked_tables().is_empty());
}
