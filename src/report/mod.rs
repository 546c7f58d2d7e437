//! Report generation.
//!
//! A pure function from per-table results to an aggregate report with
//! severity classification and rule-based recommendations. Same input,
//! same report.

pub mod format;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::TableFailure;
use crate::models::TableResult;

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "NO_DATA")]
    NoData,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pass => "PASS",
            ReportStatus::Fail => "FAIL",
            ReportStatus::NoData => "NO_DATA",
        }
    }
}

/// Ordinal severity of a discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    #[serde(rename = "ROW_COUNT_MISMATCH")]
    RowCountMismatch,
    #[serde(rename = "CHECKSUM_MISMATCH")]
    ChecksumMismatch,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::RowCountMismatch => "ROW_COUNT_MISMATCH",
            IssueType::ChecksumMismatch => "CHECKSUM_MISMATCH",
        }
    }
}

/// One table-level discrepancy entry in a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub table: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate reconciliation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub status: ReportStatus,
    pub total_tables: usize,
    pub tables_matched: usize,
    pub tables_mismatched: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub source_total_rows: i64,
    pub target_total_rows: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_tables: Option<Vec<TableFailure>>,
    /// Set when a scheduler shutdown cancelled the run before the queue
    /// drained.
    #[serde(default)]
    pub partial: bool,
}

impl Report {
    /// Attach the tables that could not be reconciled.
    pub fn with_failed_tables(mut self, failed: Vec<TableFailure>) -> Self {
        if !failed.is_empty() {
            self.failed_tables = Some(failed);
            // A run with unreconciled tables cannot pass.
            if self.status == ReportStatus::Pass {
                self.status = ReportStatus::Fail;
            }
        }
        self
    }
}

/// Severity of a row-count mismatch, from the relative size of the
/// difference against the source count.
pub fn count_mismatch_severity(source_count: i64, difference: i64) -> Severity {
    let difference = difference.abs();
    if source_count <= 0 {
        return if difference == 0 {
            Severity::Low
        } else {
            Severity::Critical
        };
    }

    let fraction = difference as f64 / source_count as f64;
    if fraction < 0.001 {
        Severity::Low
    } else if fraction < 0.01 {
        Severity::Medium
    } else if fraction < 0.10 {
        Severity::High
    } else {
        Severity::Critical
    }
}

fn row_count_discrepancy(result: &TableResult) -> Discrepancy {
    let difference = result.difference;
    Discrepancy {
        table: result.table.clone(),
        issue_type: IssueType::RowCountMismatch,
        severity: count_mismatch_severity(result.source_count, difference),
        details: json!({
            "source_count": result.source_count,
            "target_count": result.target_count,
            "missing_rows": if difference < 0 { -difference } else { 0 },
            "extra_rows": if difference > 0 { difference } else { 0 },
        }),
        timestamp: result.timestamp,
    }
}

fn checksum_discrepancy(result: &TableResult) -> Discrepancy {
    Discrepancy {
        table: result.table.clone(),
        issue_type: IssueType::ChecksumMismatch,
        severity: Severity::Critical,
        details: json!({
            "source_checksum": result.source_checksum.clone().unwrap_or_default(),
            "target_checksum": result.target_checksum.clone().unwrap_or_default(),
            "description": "Data corruption or modification detected",
        }),
        timestamp: result.timestamp,
    }
}

/// Build the aggregate report from per-table results.
pub fn generate_report(results: &[TableResult]) -> Report {
    if results.is_empty() {
        return Report {
            status: ReportStatus::NoData,
            total_tables: 0,
            tables_matched: 0,
            tables_mismatched: 0,
            discrepancies: Vec::new(),
            summary: "No comparison data available".to_string(),
            recommendations: Vec::new(),
            timestamp: Utc::now(),
            source_total_rows: 0,
            target_total_rows: 0,
            failed_tables: None,
            partial: false,
        };
    }

    let mut tables_matched = 0;
    let mut tables_mismatched = 0;
    let mut discrepancies = Vec::new();
    let mut source_total_rows = 0;
    let mut target_total_rows = 0;

    for result in results {
        source_total_rows += result.source_count;
        target_total_rows += result.target_count;

        let counts_match = result.difference == 0;
        let checksums_match = result.checksum_match.unwrap_or(true);

        if counts_match && checksums_match {
            tables_matched += 1;
            continue;
        }

        tables_mismatched += 1;
        if !counts_match {
            discrepancies.push(row_count_discrepancy(result));
        }
        if !checksums_match {
            discrepancies.push(checksum_discrepancy(result));
        }
    }

    let status = if tables_mismatched == 0 {
        ReportStatus::Pass
    } else {
        ReportStatus::Fail
    };

    let summary = if tables_mismatched == 0 {
        format!(
            "All {} tables passed reconciliation. Data is consistent.",
            results.len()
        )
    } else {
        format!(
            "Reconciliation found discrepancies in {} of {} tables. {} tables are consistent.",
            tables_mismatched,
            results.len(),
            tables_matched
        )
    };

    let recommendations = generate_recommendations(&discrepancies);

    Report {
        status,
        total_tables: results.len(),
        tables_matched,
        tables_mismatched,
        discrepancies,
        summary,
        recommendations,
        timestamp: Utc::now(),
        source_total_rows,
        target_total_rows,
        failed_tables: None,
        partial: false,
    }
}

/// Additive, deterministic recommendation rules over the discrepancy set.
fn generate_recommendations(discrepancies: &[Discrepancy]) -> Vec<String> {
    let mut recommendations = Vec::new();

    if discrepancies.is_empty() {
        recommendations.push(
            "Data is consistent. Continue monitoring replication lag and pipeline health."
                .to_string(),
        );
        return recommendations;
    }

    let detail_sum = |issue: IssueType, key: &str| -> i64 {
        discrepancies
            .iter()
            .filter(|d| d.issue_type == issue)
            .filter_map(|d| d.details.get(key).and_then(|v| v.as_i64()))
            .sum()
    };

    let missing_rows = detail_sum(IssueType::RowCountMismatch, "missing_rows");
    if missing_rows > 0 {
        recommendations.push(format!(
            "Target database is missing {missing_rows} rows. Check replication lag and connector status."
        ));
        recommendations.push("Review CDC connector logs for errors or backpressure.".to_string());
    }

    let extra_rows = detail_sum(IssueType::RowCountMismatch, "extra_rows");
    if extra_rows > 0 {
        recommendations.push(format!(
            "Target database has {extra_rows} extra rows. Investigate for duplicate inserts or data quality issues."
        ));
    }

    let checksum_issues = discrepancies
        .iter()
        .filter(|d| d.issue_type == IssueType::ChecksumMismatch)
        .count();
    if checksum_issues > 0 {
        recommendations.push(format!(
            "Data corruption detected in {checksum_issues} table(s). Run detailed row-by-row comparison to identify corrupted records."
        ));
        recommendations.push(
            "Check for schema evolution or type conversion issues in the CDC pipeline.".to_string(),
        );
    }

    if discrepancies.len() > 5 {
        recommendations.push(
            "Multiple tables affected. Consider pausing replication and performing full resync."
                .to_string(),
        );
    }

    recommendations.push("Consult docs/troubleshooting.md for detailed resolution steps.".to_string());

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(table: &str, source: i64, target: i64) -> TableResult {
        TableResult {
            table: table.to_string(),
            source_count: source,
            target_count: target,
            difference: target - source,
            matches: source == target,
            checksum_match: None,
            source_checksum: None,
            target_checksum: None,
            row_discrepancies: None,
            repair_script_path: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_empty_results_is_no_data() {
        let report = generate_report(&[]);
        assert_eq!(report.status, ReportStatus::NoData);
        assert_eq!(report.total_tables, 0);
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn test_all_matching_is_pass() {
        let report = generate_report(&[result("a", 10, 10), result("b", 0, 0)]);
        assert_eq!(report.status, ReportStatus::Pass);
        assert_eq!(report.tables_matched, 2);
        assert_eq!(report.tables_mismatched, 0);
        assert!(report.summary.contains("All 2 tables passed"));
    }

    #[test]
    fn test_count_mismatch_is_fail_with_details() {
        let report = generate_report(&[result("orders", 1000, 950)]);
        assert_eq!(report.status, ReportStatus::Fail);
        assert_eq!(report.discrepancies.len(), 1);

        let disc = &report.discrepancies[0];
        assert_eq!(disc.issue_type, IssueType::RowCountMismatch);
        // 5% difference lands in HIGH.
        assert_eq!(disc.severity, Severity::High);
        assert_eq!(disc.details["missing_rows"], 50);
        assert_eq!(disc.details["extra_rows"], 0);
    }

    #[test]
    fn test_checksum_mismatch_is_critical() {
        let mut r = result("products", 100, 100);
        r.checksum_match = Some(false);
        r.source_checksum = Some("a".repeat(64));
        r.target_checksum = Some("b".repeat(64));
        r.matches = false;

        let report = generate_report(&[r]);
        assert_eq!(report.status, ReportStatus::Fail);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].issue_type, IssueType::ChecksumMismatch);
        assert_eq!(report.discrepancies[0].severity, Severity::Critical);
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(count_mismatch_severity(0, 0), Severity::Low);
        assert_eq!(count_mismatch_severity(0, 5), Severity::Critical);
        assert_eq!(count_mismatch_severity(100_000, 50), Severity::Low);
        assert_eq!(count_mismatch_severity(100_000, 500), Severity::Medium);
        assert_eq!(count_mismatch_severity(100_000, 5_000), Severity::High);
        assert_eq!(count_mismatch_severity(100_000, 50_000), Severity::Critical);
        // Sign of the difference is irrelevant.
        assert_eq!(count_mismatch_severity(100_000, -500), Severity::Medium);
    }

    #[test]
    fn test_recommendations_are_deterministic() {
        let results = vec![result("a", 1000, 900), result("b", 100, 120)];
        let first = generate_report(&results);
        let second = generate_report(&results);
        assert_eq!(first.recommendations, second.recommendations);
        assert!(first
            .recommendations
            .iter()
            .any(|r| r.contains("missing 100 rows")));
        assert!(first
            .recommendations
            .iter()
            .any(|r| r.contains("20 extra rows")));
    }

    #[test]
    fn test_many_affected_tables_suggest_resync() {
        let results: Vec<TableResult> = (0..6)
            .map(|i| result(&format!("t{i}"), 100, 50))
            .collect();
        let report = generate_report(&results);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("full resync")));
    }

    #[test]
    fn test_failed_tables_force_fail() {
        let report = generate_report(&[result("a", 1, 1)]).with_failed_tables(vec![TableFailure {
            table: "missing_table".to_string(),
            error: "relation does not exist".to_string(),
        }]);
        assert_eq!(report.status, ReportStatus::Fail);
        assert_eq!(report.failed_tables.as_ref().unwrap().len(), 1);
    }
}
