//! Report rendering: JSON, CSV, and console text.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::report::Report;

/// Pretty-printed JSON rendering.
pub fn render_report_json(report: &Report) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write the JSON rendering to `path`, creating parent directories.
pub fn export_report_json(report: &Report, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_report_json(report)?)?;
    Ok(())
}

/// Load a previously exported report.
pub fn load_report_json(path: &Path) -> Result<Report> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Flat CSV rendering, one line per discrepancy.
pub fn render_report_csv(report: &Report) -> String {
    let mut lines = vec![
        "Table,Status,Source Count,Target Count,Difference,Issue Type,Severity".to_string(),
    ];

    for disc in &report.discrepancies {
        let details = &disc.details;
        let field = |key: &str| -> String {
            details
                .get(key)
                .and_then(|v| v.as_i64())
                .map(|v| v.to_string())
                .unwrap_or_default()
        };
        let difference = details
            .get("missing_rows")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            + details.get("extra_rows").and_then(|v| v.as_i64()).unwrap_or(0);

        lines.push(
            [
                csv_field(&disc.table),
                "FAIL".to_string(),
                field("source_count"),
                field("target_count"),
                difference.to_string(),
                disc.issue_type.as_str().to_string(),
                disc.severity.as_str().to_string(),
            ]
            .join(","),
        );
    }

    lines.join("\n") + "\n"
}

/// Write the CSV rendering to `path`, creating parent directories.
pub fn export_report_csv(report: &Report, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_report_csv(report))?;
    Ok(())
}

/// Ruled text rendering for terminals.
pub fn format_report_console(report: &Report) -> String {
    let rule = "=".repeat(80);
    let thin_rule = "-".repeat(80);
    let mut lines = Vec::new();

    lines.push(rule.clone());
    lines.push("RECONCILIATION REPORT".to_string());
    lines.push(rule.clone());
    lines.push(format!("Status: {}", report.status.as_str()));
    lines.push(format!("Timestamp: {}", report.timestamp.to_rfc3339()));
    lines.push(format!("Total Tables: {}", report.total_tables));
    lines.push(format!("Tables Matched: {}", report.tables_matched));
    lines.push(format!("Tables Mismatched: {}", report.tables_mismatched));
    lines.push(format!("Source Total Rows: {}", report.source_total_rows));
    lines.push(format!("Target Total Rows: {}", report.target_total_rows));
    if report.partial {
        lines.push("Partial: run was cancelled before completing".to_string());
    }
    lines.push(String::new());

    lines.push("SUMMARY".to_string());
    lines.push(thin_rule.clone());
    lines.push(report.summary.clone());
    lines.push(String::new());

    if !report.discrepancies.is_empty() {
        lines.push("DISCREPANCIES".to_string());
        lines.push(thin_rule.clone());
        for disc in &report.discrepancies {
            lines.push(format!("Table: {}", disc.table));
            lines.push(format!("  Issue: {}", disc.issue_type.as_str()));
            lines.push(format!("  Severity: {}", disc.severity.as_str()));
            lines.push(format!("  Details: {}", disc.details));
            lines.push(String::new());
        }
    }

    if let Some(failed) = &report.failed_tables {
        lines.push("FAILED TABLES".to_string());
        lines.push(thin_rule.clone());
        for failure in failed {
            lines.push(format!("{}: {}", failure.table, failure.error));
        }
        lines.push(String::new());
    }

    if !report.recommendations.is_empty() {
        lines.push("RECOMMENDATIONS".to_string());
        lines.push(thin_rule);
        for (i, rec) in report.recommendations.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, rec));
        }
        lines.push(String::new());
    }

    lines.push(rule);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TableResult;
    use crate::report::generate_report;
    use chrono::Utc;
    use tempfile::TempDir;

    fn mismatch_report() -> Report {
        let result = TableResult {
            table: "orders".to_string(),
            source_count: 1000,
            target_count: 950,
            difference: -50,
            matches: false,
            checksum_match: None,
            source_checksum: None,
            target_checksum: None,
            row_discrepancies: None,
            repair_script_path: None,
            timestamp: Utc::now(),
        };
        generate_report(&[result])
    }

    #[test]
    fn test_json_round_trip_is_stable() {
        let report = mismatch_report();
        let first = render_report_json(&report).unwrap();
        let parsed: Report = serde_json::from_str(&first).unwrap();
        let second = render_report_json(&parsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_json_export_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports/reconcile.json");
        let report = mismatch_report();

        export_report_json(&report, &path).unwrap();
        let loaded = load_report_json(&path).unwrap();
        assert_eq!(loaded.status, report.status);
        assert_eq!(loaded.discrepancies.len(), 1);
    }

    #[test]
    fn test_csv_header_and_row() {
        let csv = render_report_csv(&mismatch_report());
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Table,Status,Source Count,Target Count,Difference,Issue Type,Severity"
        );
        assert_eq!(
            lines.next().unwrap(),
            "orders,FAIL,1000,950,50,ROW_COUNT_MISMATCH,HIGH"
        );
    }

    #[test]
    fn test_console_sections() {
        let text = format_report_console(&mismatch_report());
        assert!(text.contains("RECONCILIATION REPORT"));
        assert!(text.contains("SUMMARY"));
        assert!(text.contains("DISCREPANCIES"));
        assert!(text.contains("RECOMMENDATIONS"));
        assert!(text.contains("Status: FAIL"));
    }
}
