//! Result records produced by the reconciliation engine.
//!
//! Everything here is immutable once constructed and serializes into the
//! report JSON surface.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

use crate::db::SqlValue;
use crate::error::{ReconcileError, Result};
use crate::sql;

/// A source/target table pair. Both identifiers are validated on
/// construction; an invalid name never reaches query assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub source: String,
    pub target: String,
}

impl TableSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let target = target.into();
        sql::validate_schema_table(&source)?;
        sql::validate_schema_table(&target)?;
        Ok(Self { source, target })
    }

    /// The common CLI case: the same name on both sides.
    pub fn same(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        sql::validate_schema_table(&name)?;
        Ok(Self {
            source: name.clone(),
            target: name,
        })
    }
}

impl fmt::Display for TableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source == self.target {
            f.write_str(&self.target)
        } else {
            write!(f, "{} -> {}", self.source, self.target)
        }
    }
}

/// Row-count comparison for one table.
#[derive(Debug, Clone, Serialize)]
pub struct CountResult {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub difference: i64,
    #[serde(rename = "match")]
    pub matches: bool,
    pub timestamp: DateTime<Utc>,
}

/// Checksum comparison for one table. Digests are 64-hex SHA-256.
#[derive(Debug, Clone, Serialize)]
pub struct ChecksumResult {
    pub table: String,
    pub source_checksum: String,
    pub target_checksum: String,
    #[serde(rename = "match")]
    pub matches: bool,
    pub timestamp: DateTime<Utc>,
}

/// Kind of a row-level divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyKind {
    #[serde(rename = "MISSING")]
    Missing,
    #[serde(rename = "EXTRA")]
    Extra,
    #[serde(rename = "MODIFIED")]
    Modified,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyKind::Missing => "MISSING",
            DiscrepancyKind::Extra => "EXTRA",
            DiscrepancyKind::Modified => "MODIFIED",
        }
    }
}

/// Ordered column/value pairs; serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowData(pub Vec<(String, SqlValue)>);

impl RowData {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, SqlValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for RowData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A single observed row divergence.
///
/// `Missing`: present in source, absent in target (`source_row` set).
/// `Extra`: present in target, absent in source (`target_row` set).
/// `Modified`: present in both with differing non-key columns.
#[derive(Debug, Clone, Serialize)]
pub struct RowDiscrepancy {
    pub table: String,
    pub primary_key: RowData,
    pub kind: DiscrepancyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_row: Option<RowData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_row: Option<RowData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_columns: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

/// Full per-table reconciliation outcome.
///
/// `matches` is the conjunction of the count match and, when computed, the
/// checksum match. Mismatch is data, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct TableResult {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub difference: i64,
    #[serde(rename = "match")]
    pub matches: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_discrepancies: Option<Vec<RowDiscrepancy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_script_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

/// Compare already-fetched row counts.
pub fn compare_row_counts(table: &str, source_count: i64, target_count: i64) -> Result<CountResult> {
    if source_count < 0 || target_count < 0 {
        return Err(ReconcileError::NegativeCount {
            source_count,
            target_count,
        });
    }

    Ok(CountResult {
        table: table.to_string(),
        source_count,
        target_count,
        difference: target_count - source_count,
        matches: source_count == target_count,
        timestamp: Utc::now(),
    })
}

/// Compare already-computed checksums.
pub fn compare_checksums(table: &str, source_checksum: &str, target_checksum: &str) -> ChecksumResult {
    ChecksumResult {
        table: table.to_string(),
        source_checksum: source_checksum.to_string(),
        target_checksum: target_checksum.to_string(),
        matches: source_checksum == target_checksum,
        timestamp: Utc::now(),
    }
}
