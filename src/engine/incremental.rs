//! Incremental checksums driven by a change-tracking column.
//!
//! A per-table state file remembers when the last checksum ran; subsequent
//! runs hash only rows whose change timestamp is newer. Delta digests are
//! comparable between source and target only when both sides share the same
//! `last_run`, so each side keeps its own state directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn, Instrument};

use crate::db::{QueryExecutor, SqlValue};
use crate::engine::checksum::checksum_with_count;
use crate::error::Result;
use crate::metrics;
use crate::sql;

/// Change-tracking column consulted when the caller does not name one.
pub const DEFAULT_CHANGE_TRACKING_COLUMN: &str = "updated_at";

/// How a persisted checksum was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumMode {
    Full,
    Incremental,
}

impl ChecksumMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumMode::Full => "full",
            ChecksumMode::Incremental => "incremental",
        }
    }
}

/// Persisted per-table checksum state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumState {
    pub table: String,
    pub checksum: String,
    pub row_count: u64,
    pub last_run: DateTime<Utc>,
    pub mode: ChecksumMode,
}

/// One JSON state file per table under `state_dir`.
///
/// Reads tolerate absent or corrupt files by reporting no state; writes are
/// atomic (temp file + rename) so a crash never leaves a partial file.
#[derive(Debug, Clone)]
pub struct ChecksumStateStore {
    state_dir: PathBuf,
}

impl ChecksumStateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        debug!(dir = %state_dir.display(), "initialized checksum state store");
        Ok(Self { state_dir })
    }

    /// Map filesystem-hostile characters in the table name to `_`.
    fn sanitize(table: &str) -> String {
        table
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                other => other,
            })
            .collect()
    }

    fn state_file(&self, table: &str) -> PathBuf {
        self.state_dir
            .join(format!("{}_checksum_state.json", Self::sanitize(table)))
    }

    /// Load the state for a table. Malformed files count as absent.
    pub fn load(&self, table: &str) -> Option<ChecksumState> {
        let path = self.state_file(table);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!(table = %table, "no previous checksum state");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(state) => {
                metrics::CHECKSUM_STATE_OPERATIONS
                    .with_label_values(&["load"])
                    .inc();
                Some(state)
            }
            Err(e) => {
                warn!(table = %table, path = %path.display(), error = %e, "malformed checksum state, treating as absent");
                None
            }
        }
    }

    /// Timestamp of the last successful checksum, if any.
    pub fn last_run(&self, table: &str) -> Option<DateTime<Utc>> {
        self.load(table).map(|state| state.last_run)
    }

    /// Persist the state for a table atomically.
    pub fn save(
        &self,
        table: &str,
        checksum: &str,
        row_count: u64,
        mode: ChecksumMode,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let state = ChecksumState {
            table: table.to_string(),
            checksum: checksum.to_string(),
            row_count,
            last_run: timestamp,
            mode,
        };

        let path = self.state_file(table);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(&state)?;

        fs::write(&tmp, payload)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        metrics::CHECKSUM_STATE_OPERATIONS
            .with_label_values(&["save"])
            .inc();
        info!(table = %table, rows = row_count, mode = mode.as_str(), "saved checksum state");
        Ok(())
    }

    /// Drop the saved state for a table.
    pub fn clear(&self, table: &str) -> Result<()> {
        let path = self.state_file(table);
        if path.exists() {
            fs::remove_file(&path)?;
            info!(table = %table, "cleared checksum state");
        }
        Ok(())
    }

    /// Tables with saved state, sorted by name.
    pub fn list_tracked_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = fs::read_dir(&self.state_dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_suffix("_checksum_state.json"))
                    .map(str::to_string)
            })
            .collect();
        tables.sort();
        tables
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

/// Checksum only the rows changed since the last run.
///
/// With no prior state the full table is hashed and recorded as `full`
/// mode. Otherwise only rows with `change_tracking_column > last_run` are
/// hashed, as `incremental` mode. Returns the digest and the number of rows
/// scanned. A delta digest characterizes the delta alone; compare it only
/// against the other side's delta for the same `last_run`.
pub async fn calculate_incremental_checksum(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    pk_column: &str,
    change_tracking_column: &str,
    store: &ChecksumStateStore,
) -> Result<(String, u64)> {
    let last_run = store.last_run(table);
    let mode = match last_run {
        Some(_) => ChecksumMode::Incremental,
        None => ChecksumMode::Full,
    };

    let span = tracing::info_span!("calculate_checksum", table = %table, mode = mode.as_str());
    let timer = metrics::INCREMENTAL_CHECKSUM_DURATION
        .with_label_values(&[table, mode.as_str()])
        .start_timer();

    let started_at = Utc::now();
    let (checksum, row_count) = async {
        match last_run {
            None => {
                info!(table = %table, "no prior state, computing full checksum");
                checksum_with_count(executor, table, None).await
            }
            Some(since) => {
                info!(table = %table, since = %since, "computing delta checksum");
                delta_checksum(executor, table, pk_column, change_tracking_column, since).await
            }
        }
    }
    .instrument(span)
    .await?;

    timer.observe_duration();
    metrics::INCREMENTAL_CHECKSUM_ROWS
        .with_label_values(&[table, mode.as_str()])
        .inc_by(row_count);

    store.save(table, &checksum, row_count, mode, started_at)?;

    debug!(
        table = %table,
        rows = row_count,
        mode = mode.as_str(),
        checksum = &checksum[..16.min(checksum.len())],
        "incremental checksum complete"
    );
    Ok((checksum, row_count))
}

async fn delta_checksum(
    executor: &mut (dyn QueryExecutor + Send),
    table: &str,
    pk_column: &str,
    change_tracking_column: &str,
    since: DateTime<Utc>,
) -> Result<(String, u64)> {
    let dialect = executor.dialect();
    let quoted_table = sql::quote_schema_table(table, dialect)?;
    let quoted_pk = sql::quote_identifier(pk_column, dialect)?;
    let quoted_change = sql::quote_identifier(change_tracking_column, dialect)?;
    let placeholder = dialect.placeholder(0);

    let query = format!(
        "SELECT * FROM {quoted_table} WHERE {quoted_change} > {placeholder} ORDER BY {quoted_pk}"
    );

    let mut hasher = Sha256::new();
    let mut rows: u64 = 0;

    let mut stream = executor
        .query_stream(&query, &[SqlValue::TimestampTz(since)])
        .await?;
    while let Some(row) = stream.next_row().await? {
        hasher.update(row.encode().as_bytes());
        rows += 1;
    }

    Ok((hex::encode(hasher.finalize()), rows))
}
