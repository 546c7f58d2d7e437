//! The reconciliation engine.
//!
//! Leaves first: counts and checksums over a single connection, the
//! incremental state machinery, the row-level differ and repair emitter,
//! then the per-table pipeline and the parallel orchestrator above it.

pub mod checksum;
pub mod counts;
pub mod incremental;
pub mod parallel;
pub mod reconciler;
pub mod repair;
pub mod row_level;

pub use checksum::{calculate_checksum, calculate_checksum_chunked, DEFAULT_CHUNK_SIZE};
pub use counts::get_row_count;
pub use incremental::{
    calculate_incremental_checksum, ChecksumMode, ChecksumState, ChecksumStateStore,
    DEFAULT_CHANGE_TRACKING_COLUMN,
};
pub use parallel::{ParallelOptions, ParallelOutcome, ParallelReconciler, TableFailure};
pub use reconciler::{reconcile_table, ReconcileOptions};
pub use repair::generate_repair_script;
pub use row_level::{RowLevelOptions, RowLevelReconciler};
