#![deny(unsafe_code)]

//! Migration execution core.
//!
//! Runs confirmed mappings against a [`TargetStore`] under table leases and a
//! pre-migration snapshot, routes transient write failures to the
//! [`RetryQueue`], flags likely duplicates, scores batch quality and records
//! cell-level lineage. [`MigrationEngine`] ties the stages together.

pub mod dedupe;
pub mod engine;
pub mod executor;
pub mod io;
pub mod lineage;
pub mod lock;
pub mod quality;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use dedupe::{
    AUTO_MERGE_RESOLVER, DedupEngine, DedupRules, ScanSummary, field_similarities,
    overall_similarity,
};
pub use engine::MigrationEngine;
pub use executor::{
    BatchProgress, BatchRun, BatchState, CancellationFlag, ExecutorState, LiveCounters,
    MigrationExecutor, PendingRow, RetryReport,
};
pub use io::{read_json, write_json_atomic};
pub use lineage::LineageTracker;
pub use lock::{TableLease, TableLockRegistry};
pub use quality::{QualityMetrics, QualityScorer, SubScores};
pub use retry::{RetryOutcome, RetryQueue, RetryRequest};
pub use snapshot::{SnapshotManager, snapshot_checksum};
pub use store::{InMemoryStore, TargetStore};
